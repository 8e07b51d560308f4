//! Shared test helpers: a scripted in-memory fetcher and a recording progress sink.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::downloader::BatchDownloader;
use crate::error::FetchError;
use crate::fetch::{FetchOutcome, MediaFetcher, ProgressReporter};
use crate::sink::{MemorySink, ProgressSink};
use crate::types::{MediaKind, MediaReference, TaskId, TaskRecord, TaskStatus};

/// What one scripted attempt does
#[derive(Clone, Debug)]
pub(crate) enum Script {
    /// Deliver `body` in `chunks` pieces, sleeping `chunk_delay` before each
    Deliver {
        body: Bytes,
        chunks: usize,
        chunk_delay: Duration,
    },
    /// Fail with the given error
    Fail(FetchError),
    /// Never finish on its own; only a stop ends it
    Hang,
}

impl Script {
    pub(crate) fn slow(body: &'static [u8], chunks: usize, chunk_delay: Duration) -> Self {
        Script::Deliver {
            body: Bytes::from_static(body),
            chunks,
            chunk_delay,
        }
    }
}

/// In-memory fetcher driven by per-URL scripts
///
/// Each call pops the next script for the reference URL. When a URL has no
/// scripts left, the fallback is used (an immediate delivery of the URL bytes
/// unless overridden).
pub(crate) struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, VecDeque<Script>>>,
    fallback: Mutex<Option<Script>>,
    calls: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedFetcher {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(HashMap::new()),
            fallback: Mutex::new(None),
            calls: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    /// Queue scripts for one URL, consumed in order
    pub(crate) fn script(&self, url: &str, steps: impl IntoIterator<Item = Script>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .extend(steps);
    }

    /// Script used once a URL has no queued scripts left
    pub(crate) fn fallback(&self, script: Script) {
        *self.fallback.lock().unwrap() = Some(script);
    }

    pub(crate) fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_script(&self, url: &str) -> Script {
        *self.calls.lock().unwrap().entry(url.to_string()).or_default() += 1;

        let queued = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(VecDeque::pop_front);

        queued
            .or_else(|| self.fallback.lock().unwrap().clone())
            .unwrap_or_else(|| Script::Deliver {
                body: Bytes::copy_from_slice(url.as_bytes()),
                chunks: 1,
                chunk_delay: Duration::ZERO,
            })
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl MediaFetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        reference: &MediaReference,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, FetchError> {
        let script = self.next_script(&reference.url);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        match script {
            Script::Deliver {
                body,
                chunks,
                chunk_delay,
            } => {
                let total = body.len() as u64;
                let chunks = chunks.max(1) as u64;
                for i in 1..=chunks {
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(FetchOutcome::Aborted),
                        _ = tokio::time::sleep(chunk_delay) => {}
                    }
                    progress.report(total * i / chunks, Some(total));
                }
                Ok(FetchOutcome::Completed(body))
            }
            Script::Fail(error) => {
                tokio::task::yield_now().await;
                Err(error)
            }
            Script::Hang => {
                cancel.cancelled().await;
                Ok(FetchOutcome::Aborted)
            }
        }
    }
}

/// Progress sink that keeps every snapshot it is given
#[derive(Default)]
pub(crate) struct RecordingSink {
    snapshots: Mutex<Vec<Vec<TaskRecord>>>,
    completions: Mutex<Vec<Vec<TaskRecord>>>,
}

impl RecordingSink {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn progress_calls(&self) -> usize {
        self.snapshots.lock().unwrap().len()
    }

    pub(crate) fn complete_calls(&self) -> usize {
        self.completions.lock().unwrap().len()
    }

    pub(crate) fn snapshots(&self) -> Vec<Vec<TaskRecord>> {
        self.snapshots.lock().unwrap().clone()
    }

    /// Status history of one task across all snapshots, consecutive repeats collapsed
    pub(crate) fn status_history(&self, task_id: &TaskId) -> Vec<TaskStatus> {
        let mut history: Vec<TaskStatus> = Vec::new();
        for snapshot in self.snapshots.lock().unwrap().iter() {
            if let Some(task) = snapshot.iter().find(|t| t.task_id() == task_id) {
                if history.last() != Some(&task.status()) {
                    history.push(task.status());
                }
            }
        }
        history
    }

    /// Highest number of `downloading` tasks seen in any snapshot
    pub(crate) fn max_downloading(&self) -> usize {
        self.snapshots
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.iter().filter(|t| t.status() == TaskStatus::Downloading).count())
            .max()
            .unwrap_or(0)
    }
}

impl ProgressSink for RecordingSink {
    fn on_progress(&self, snapshot: &[TaskRecord]) {
        self.snapshots.lock().unwrap().push(snapshot.to_vec());
    }

    fn on_complete(&self, snapshot: &[TaskRecord]) {
        self.completions.lock().unwrap().push(snapshot.to_vec());
    }
}

/// Config with fast backoff for tests
pub(crate) fn test_config(max_concurrent: usize) -> Config {
    let mut config = Config::default();
    config.download.max_concurrent_downloads = max_concurrent;
    config.retry.max_retries = 3;
    config.retry.base_delay = Duration::from_millis(10);
    config
}

/// Build a downloader around a scripted fetcher and an in-memory output sink
pub(crate) fn create_test_downloader(
    config: Config,
) -> (BatchDownloader, Arc<ScriptedFetcher>, Arc<MemorySink>) {
    let fetcher = ScriptedFetcher::new();
    let output = Arc::new(MemorySink::new());
    let downloader =
        BatchDownloader::with_components(config, fetcher.clone(), output.clone()).unwrap();
    (downloader, fetcher, output)
}

pub(crate) fn image(id: &str) -> MediaReference {
    MediaReference::new(
        id,
        format!("https://cdn.example.com/images/{id}.png"),
        MediaKind::Image,
    )
}

pub(crate) fn video(id: &str) -> MediaReference {
    MediaReference::new(
        id,
        format!("https://cdn.example.com/videos/{id}.mp4"),
        MediaKind::Video,
    )
}

/// Poll `condition` against the downloader stats until it holds (panics after 5s)
pub(crate) async fn wait_for<F>(downloader: &BatchDownloader, condition: F)
where
    F: Fn(&crate::types::BatchStats) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if condition(&downloader.get_stats().await) {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time: {:?}",
            downloader.get_stats().await
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
