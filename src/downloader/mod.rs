//! Core downloader implementation split into focused submodules.
//!
//! The `BatchDownloader` struct and its methods are organized by domain:
//! - [`control`] - Run lifecycle control (start/pause/resume/cancel)
//! - [`run`] - Bounded-concurrency run loop, retry scheduling and batch finalization

mod control;
mod run;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::MutexGuard;
use tokio_util::sync::CancellationToken;

use crate::archive::output_file_name;
use crate::config::Config;
use crate::error::Result;
use crate::fetch::{HttpFetcher, MediaFetcher};
use crate::registry::TaskRegistry;
use crate::retry::RetryPolicy;
use crate::sink::{DirectorySink, OutputSink, ProgressSink};
use crate::types::{BatchStats, Event, MediaReference, TaskId, TaskRecord};

/// Where the downloader is in its run lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RunPhase {
    /// No run in progress
    Idle,
    /// The run loop is dispatching tasks
    Running,
    /// `pause()` was called; waiting for `resume()`
    Paused,
}

/// Stop signal shared between one run loop and the control methods
#[derive(Debug, Default)]
pub(crate) struct RunSignal {
    /// Fired by `pause()` and `cancel()`; observed by every in-flight fetch
    pub(crate) stop: CancellationToken,
    /// Set by `cancel()`; the run loop must not touch the registry afterwards
    pub(crate) cancelled: AtomicBool,
}

impl RunSignal {
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// State guarded by the downloader mutex
pub(crate) struct BatchState {
    pub(crate) registry: TaskRegistry,
    pub(crate) phase: RunPhase,
    /// Signal of the current (or last) run
    pub(crate) signal: Arc<RunSignal>,
    /// Sink supplied to `start()`, reused by `resume()`
    pub(crate) sink: Option<Arc<dyn ProgressSink>>,
    /// Snapshots waiting to be handed to the sink once the lock is released
    pub(crate) outbox: Vec<Vec<TaskRecord>>,
}

impl BatchState {
    /// Queue the current snapshot for the progress sink
    ///
    /// Delivered by [`BatchDownloader::release`], never under the lock.
    pub(crate) fn notify_progress(&mut self) {
        if self.sink.is_some() {
            let snapshot = self.registry.snapshot();
            self.outbox.push(snapshot);
        }
    }
}

/// Batch media downloader (cloneable - all fields are Arc-wrapped)
///
/// Owns one task registry. Tasks are added with [`add_tasks`](Self::add_tasks)
/// and retrieved by [`start`](Self::start), which resolves once every task is
/// terminal or the run is paused or cancelled. Clones share the same registry,
/// so a clone can pause or cancel a run awaited elsewhere.
///
/// # Examples
///
/// ```no_run
/// use media_batch_dl::{BatchDownloader, Config, MediaKind, MediaReference, NoopProgress, RunOutcome};
/// use std::sync::Arc;
///
/// # async fn example() -> media_batch_dl::Result<()> {
/// let downloader = BatchDownloader::new(Config::default())?;
/// downloader
///     .add_tasks(vec![
///         MediaReference::new("1", "https://cdn.example.com/1.png", MediaKind::Image),
///         MediaReference::new("2", "https://cdn.example.com/2.mp4", MediaKind::Video),
///     ])
///     .await;
///
/// if let RunOutcome::Completed(report) = downloader.start(Arc::new(NoopProgress)).await? {
///     println!("{} succeeded, {} failed", report.succeeded, report.failed);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct BatchDownloader {
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Registry and run lifecycle state
    pub(crate) state: Arc<tokio::sync::Mutex<BatchState>>,
    /// Held by the run loop; a new run waits for the previous loop to wind down
    pub(crate) run_lock: Arc<tokio::sync::Mutex<()>>,
    /// Wakes the run loop when tasks are added mid-run
    pub(crate) wake: Arc<tokio::sync::Notify>,
    /// Retrieval implementation
    pub(crate) fetcher: Arc<dyn MediaFetcher>,
    /// Destination for payloads and archives
    pub(crate) output: Arc<dyn OutputSink>,
    /// Retry policy derived from config
    pub(crate) retry_policy: RetryPolicy,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
}

impl BatchDownloader {
    /// Create a downloader that fetches over HTTP and writes into `config.output.output_dir`
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let fetcher = Arc::new(HttpFetcher::new(&config.download)?);
        let output = Arc::new(DirectorySink::from_config(&config.output));
        Self::with_components(config, fetcher, output)
    }

    /// Create a downloader with a custom fetcher and output sink
    pub fn with_components(
        config: Config,
        fetcher: Arc<dyn MediaFetcher>,
        output: Arc<dyn OutputSink>,
    ) -> Result<Self> {
        config.validate()?;

        // Buffer of 1000 events so slow subscribers rarely lag
        let (event_tx, _rx) = tokio::sync::broadcast::channel(1000);

        let state = BatchState {
            registry: TaskRegistry::new(),
            phase: RunPhase::Idle,
            signal: Arc::new(RunSignal::default()),
            sink: None,
            outbox: Vec::new(),
        };

        tracing::debug!(
            max_concurrent_downloads = config.download.max_concurrent_downloads,
            max_retries = config.retry.max_retries,
            aggregate_as_archive = config.archive.aggregate_as_archive,
            "batch downloader created"
        );

        Ok(Self {
            retry_policy: RetryPolicy::new(&config.retry),
            config: Arc::new(config),
            state: Arc::new(tokio::sync::Mutex::new(state)),
            run_lock: Arc::new(tokio::sync::Mutex::new(())),
            wake: Arc::new(tokio::sync::Notify::new()),
            fetcher,
            output,
            event_tx,
        })
    }

    /// Add references to the registry, one `pending` task each, and return their ids
    ///
    /// May be called while a run is in progress; new tasks are dispatched as
    /// soon as a slot frees up.
    pub async fn add_tasks<I>(&self, references: I) -> Vec<TaskId>
    where
        I: IntoIterator<Item = MediaReference>,
    {
        let mut state = self.state.lock().await;
        let ids = state.registry.add_tasks(references);

        for task_id in &ids {
            if let Some(task) = state.registry.get(task_id) {
                self.emit_event(Event::TaskQueued {
                    task_id: task_id.clone(),
                    name: output_file_name(task.reference()),
                });
            }
        }

        if state.phase == RunPhase::Running {
            state.notify_progress();
        }
        self.release(state);

        tracing::debug!(count = ids.len(), "tasks queued");
        self.wake.notify_one();
        ids
    }

    /// Counts per status and mean progress
    pub async fn get_stats(&self) -> BatchStats {
        self.state.lock().await.registry.stats()
    }

    /// Copy of every task record, in insertion order
    pub async fn snapshot(&self) -> Vec<TaskRecord> {
        self.state.lock().await.registry.snapshot()
    }

    /// Subscribe to run events
    ///
    /// Every subscriber receives every event emitted after it subscribed.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        self.config.clone()
    }

    /// Unlock the state, then deliver queued snapshots to the progress sink
    ///
    /// Sinks may call back into the downloader. Delivery stops as soon as the
    /// run is cancelled.
    pub(crate) fn release(&self, mut state: MutexGuard<'_, BatchState>) {
        let outbox = std::mem::take(&mut state.outbox);
        let sink = state.sink.clone();
        let signal = state.signal.clone();
        drop(state);

        let Some(sink) = sink else {
            return;
        };
        for snapshot in outbox {
            if signal.is_cancelled() {
                return;
            }
            sink.on_progress(&snapshot);
        }
    }

    pub(crate) fn emit_event(&self, event: Event) {
        // send() returns Err if there are no receivers, which is fine - we just drop the event
        self.event_tx.send(event).ok();
    }
}
