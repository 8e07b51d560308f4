//! Caller-facing sinks: progress callbacks and output destinations

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::config::{FileCollisionAction, OutputConfig};
use crate::error::Result;
use crate::types::TaskRecord;
use crate::utils::get_unique_path;

/// Receives registry snapshots while a batch runs
///
/// `on_progress` is called after every task transition and whenever a task's
/// progress advances by at least one whole percent. `on_complete` is called
/// exactly once, when every task has reached a terminal state. Neither is
/// called after `cancel()`.
///
/// Callbacks run on the downloader's run loop, outside its state lock, so they
/// may query the downloader. Keep them short.
pub trait ProgressSink: Send + Sync {
    /// A task changed state or made progress
    fn on_progress(&self, snapshot: &[TaskRecord]);

    /// The batch finished
    fn on_complete(&self, snapshot: &[TaskRecord]);
}

/// Sink that ignores every notification
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn on_progress(&self, _snapshot: &[TaskRecord]) {}

    fn on_complete(&self, _snapshot: &[TaskRecord]) {}
}

/// Sink built from two closures
///
/// ```
/// use media_batch_dl::sink::CallbackSink;
/// use media_batch_dl::types::TaskRecord;
///
/// let sink = CallbackSink::new(
///     |snapshot: &[TaskRecord]| println!("{} tasks", snapshot.len()),
///     |_: &[TaskRecord]| println!("done"),
/// );
/// # let _ = sink;
/// ```
pub struct CallbackSink<P, C> {
    on_progress: P,
    on_complete: C,
}

impl<P, C> CallbackSink<P, C>
where
    P: Fn(&[TaskRecord]) + Send + Sync,
    C: Fn(&[TaskRecord]) + Send + Sync,
{
    /// Wrap the two callbacks
    pub fn new(on_progress: P, on_complete: C) -> Self {
        Self {
            on_progress,
            on_complete,
        }
    }
}

impl<P, C> ProgressSink for CallbackSink<P, C>
where
    P: Fn(&[TaskRecord]) + Send + Sync,
    C: Fn(&[TaskRecord]) + Send + Sync,
{
    fn on_progress(&self, snapshot: &[TaskRecord]) {
        (self.on_progress)(snapshot)
    }

    fn on_complete(&self, snapshot: &[TaskRecord]) {
        (self.on_complete)(snapshot)
    }
}

/// Destination for finished files: individual payloads or the batch archive
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Store `data` under `file_name`; returns the name actually used
    async fn save(&self, file_name: &str, data: Bytes) -> Result<String>;
}

/// Writes files into a directory
#[derive(Clone, Debug)]
pub struct DirectorySink {
    dir: PathBuf,
    collision: FileCollisionAction,
}

impl DirectorySink {
    /// Write into `dir`, resolving name clashes with `collision`
    pub fn new(dir: impl Into<PathBuf>, collision: FileCollisionAction) -> Self {
        Self {
            dir: dir.into(),
            collision,
        }
    }

    /// Build from the output configuration
    pub fn from_config(config: &OutputConfig) -> Self {
        Self::new(config.output_dir.clone(), config.file_collision)
    }

    /// Target directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl OutputSink for DirectorySink {
    async fn save(&self, file_name: &str, data: Bytes) -> Result<String> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = get_unique_path(&self.dir.join(file_name), self.collision)?;
        tokio::fs::write(&path, &data).await?;

        let saved = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_name.to_string());

        tracing::info!(
            path = %path.display(),
            size_bytes = data.len(),
            "file saved"
        );
        Ok(saved)
    }
}

/// Keeps saved files in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    files: Mutex<Vec<(String, Bytes)>>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Files saved so far, in save order
    pub async fn files(&self) -> Vec<(String, Bytes)> {
        self.files.lock().await.clone()
    }
}

#[async_trait]
impl OutputSink for MemorySink {
    async fn save(&self, file_name: &str, data: Bytes) -> Result<String> {
        self.files.lock().await.push((file_name.to_string(), data));
        Ok(file_name.to_string())
    }
}
