//! Core types for media-batch-dl

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{FetchError, FetchErrorKind};

/// Unique identifier for a task within a downloader
///
/// Built from the media kind, the caller's id, the creation time and a
/// registry sequence number, e.g. `image-42-1718000000000-7`, so the same
/// reference submitted twice yields two distinct tasks.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Create a task id from its parts
    pub fn new(kind: MediaKind, id: &str, created_at_ms: i64, sequence: u64) -> Self {
        Self(format!("{}-{}-{}-{}", kind.as_str(), id, created_at_ms, sequence))
    }

    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of media behind a reference
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Still image, archived as PNG
    Image,
    /// Video clip, archived as MP4
    Video,
}

impl MediaKind {
    /// Lowercase name used in task ids and default file names
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }

    /// Archive folder for this kind
    pub fn folder(&self) -> &'static str {
        match self {
            MediaKind::Image => "images",
            MediaKind::Video => "videos",
        }
    }

    /// File extension for this kind
    pub fn extension(&self) -> &'static str {
        match self {
            MediaKind::Image => "png",
            MediaKind::Video => "mp4",
        }
    }
}

/// A remote media item to retrieve, as supplied by the caller
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaReference {
    /// Caller-assigned identifier
    pub id: String,
    /// Source URL
    pub url: String,
    /// Media kind
    pub kind: MediaKind,
    /// Optional file name (without extension) used for saving
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl MediaReference {
    /// Create a reference without a display name
    pub fn new(id: impl Into<String>, url: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            kind,
            display_name: None,
        }
    }

    /// Set the display name
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// File name (without extension): the display name if present, else `<kind>-<id>`
    pub fn file_stem(&self) -> String {
        match self.display_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("{}-{}", self.kind.as_str(), self.id),
        }
    }

    /// File name with the extension for this kind
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.file_stem(), self.kind.extension())
    }
}

/// Task lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting to be dispatched
    Pending,
    /// A retrieval is in flight
    Downloading,
    /// Payload retrieved
    Completed,
    /// Last attempt failed (terminal once retries are exhausted)
    Failed,
    /// In-flight retrieval abandoned by `pause()`
    Paused,
}

impl TaskStatus {
    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Downloading)
                | (Pending, Failed)
                | (Downloading, Completed)
                | (Downloading, Failed)
                | (Downloading, Paused)
                | (Failed, Pending)
                | (Paused, Pending)
        )
    }
}

/// Tracking record for one media reference
///
/// Records are only mutated by the downloader's run loop; callers receive
/// cloned snapshots. The payload is reference counted, so snapshots are cheap.
#[derive(Clone, Debug)]
pub struct TaskRecord {
    pub(crate) task_id: TaskId,
    pub(crate) reference: Arc<MediaReference>,
    pub(crate) status: TaskStatus,
    pub(crate) progress: f32,
    pub(crate) bytes_received: u64,
    pub(crate) total_bytes: Option<u64>,
    pub(crate) error_message: Option<String>,
    pub(crate) error_kind: Option<FetchErrorKind>,
    pub(crate) retry_count: u32,
    pub(crate) attempts: u32,
    pub(crate) payload: Option<Bytes>,
}

impl TaskRecord {
    pub(crate) fn new(task_id: TaskId, reference: Arc<MediaReference>) -> Self {
        Self {
            task_id,
            reference,
            status: TaskStatus::Pending,
            progress: 0.0,
            bytes_received: 0,
            total_bytes: None,
            error_message: None,
            error_kind: None,
            retry_count: 0,
            attempts: 0,
            payload: None,
        }
    }

    /// Task id
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// The reference this task retrieves
    pub fn reference(&self) -> &MediaReference {
        &self.reference
    }

    /// Current status
    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// Progress percentage (0.0 to 100.0)
    ///
    /// Stays at 0 while the total size is unknown, see [`TaskRecord::is_indeterminate`].
    pub fn progress(&self) -> f32 {
        self.progress
    }

    /// Bytes received by the current attempt
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Total size announced by the server, if any
    pub fn total_bytes(&self) -> Option<u64> {
        self.total_bytes
    }

    /// True while downloading without a known total size
    pub fn is_indeterminate(&self) -> bool {
        self.status == TaskStatus::Downloading && self.total_bytes.is_none()
    }

    /// Error message of the last failure (only while `failed`)
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Classification of the last failure (only while `failed`)
    pub fn error_kind(&self) -> Option<FetchErrorKind> {
        self.error_kind
    }

    /// Number of automatic retries performed
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Number of times the task has been dispatched
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Retrieved content (only while `completed`)
    pub fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    fn transition(&mut self, next: TaskStatus) -> bool {
        if !self.status.can_transition_to(next) {
            tracing::warn!(
                task_id = %self.task_id,
                from = ?self.status,
                to = ?next,
                "ignoring illegal task transition"
            );
            return false;
        }
        self.status = next;
        true
    }

    /// pending -> downloading; starts a fresh attempt from byte 0
    pub(crate) fn begin_attempt(&mut self) -> bool {
        if !self.transition(TaskStatus::Downloading) {
            return false;
        }
        self.attempts += 1;
        self.progress = 0.0;
        self.bytes_received = 0;
        self.total_bytes = None;
        true
    }

    /// Apply a progress report; returns true when the whole percentage advanced
    pub(crate) fn record_progress(&mut self, received: u64, total: Option<u64>) -> bool {
        if self.status != TaskStatus::Downloading {
            return false;
        }
        let before = self.progress.floor();
        self.bytes_received = self.bytes_received.max(received);
        self.total_bytes = total.filter(|t| *t > 0);
        if let Some(total) = self.total_bytes {
            let percent = (self.bytes_received as f64 / total as f64 * 100.0).min(100.0) as f32;
            self.progress = self.progress.max(percent);
        }
        self.progress.floor() > before
    }

    /// downloading -> completed
    pub(crate) fn complete(&mut self, payload: Bytes) -> bool {
        if !self.transition(TaskStatus::Completed) {
            return false;
        }
        self.bytes_received = payload.len() as u64;
        self.progress = 100.0;
        self.payload = Some(payload);
        self.error_message = None;
        self.error_kind = None;
        true
    }

    /// downloading -> failed, or pending -> failed for references rejected before dispatch
    pub(crate) fn fail(&mut self, error: &FetchError) -> bool {
        if !self.transition(TaskStatus::Failed) {
            return false;
        }
        self.error_message = Some(error.to_string());
        self.error_kind = Some(error.kind());
        true
    }

    /// failed -> pending for an automatic retry; increments the retry count
    pub(crate) fn schedule_retry(&mut self) -> bool {
        if !self.transition(TaskStatus::Pending) {
            return false;
        }
        self.retry_count += 1;
        self.error_message = None;
        self.error_kind = None;
        true
    }

    /// downloading -> paused
    pub(crate) fn pause(&mut self) -> bool {
        self.transition(TaskStatus::Paused)
    }

    /// paused -> pending
    pub(crate) fn requeue(&mut self) -> bool {
        self.transition(TaskStatus::Pending)
    }
}

/// Counts per status plus overall progress
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchStats {
    /// Number of tasks in the registry
    pub total: usize,
    /// Tasks waiting for dispatch
    pub pending: usize,
    /// Tasks with a retrieval in flight
    pub downloading: usize,
    /// Tasks with a payload
    pub completed: usize,
    /// Tasks whose last attempt failed
    pub failed: usize,
    /// Tasks paused mid-flight
    pub paused: usize,
    /// Arithmetic mean of every task's progress (0 when there are no tasks)
    pub overall_progress: f32,
}

/// Archive produced by a completed batch
#[derive(Clone, Debug)]
pub struct ArchiveOutput {
    /// File name, e.g. `downloads.zip`
    pub file_name: String,
    /// Entry paths in archive order
    pub entries: Vec<String>,
    /// Archive content
    pub bytes: Bytes,
}

/// Summary of a finished batch
#[derive(Clone, Debug)]
pub struct BatchReport {
    /// Tasks that ended `completed`
    pub succeeded: usize,
    /// Tasks that ended `failed`
    pub failed: usize,
    /// The archive, when aggregation is enabled
    pub archive: Option<ArchiveOutput>,
}

impl BatchReport {
    /// True when some, but not all, tasks failed
    pub fn is_partial(&self) -> bool {
        self.succeeded > 0 && self.failed > 0
    }
}

/// How a call to `start()` or `resume()` ended
#[derive(Clone, Debug)]
pub enum RunOutcome {
    /// Every task reached a terminal state
    Completed(BatchReport),
    /// The run was paused; call `resume()` to continue
    Paused,
    /// The run was cancelled and the registry cleared
    Cancelled,
}

/// Event emitted during a batch run
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Task added to the registry
    TaskQueued {
        /// Task ID
        task_id: TaskId,
        /// File name the task will be saved under
        name: String,
    },

    /// Retrieval dispatched for a task
    TaskStarted {
        /// Task ID
        task_id: TaskId,
        /// Dispatch number, starting at 1
        attempt: u32,
    },

    /// Retrieval progress (emitted per whole percent)
    TaskProgress {
        /// Task ID
        task_id: TaskId,
        /// Progress percentage (0.0 to 100.0)
        percent: f32,
        /// Bytes received so far
        bytes_received: u64,
        /// Total size, if known
        #[serde(skip_serializing_if = "Option::is_none")]
        total_bytes: Option<u64>,
    },

    /// Task retrieved successfully
    TaskCompleted {
        /// Task ID
        task_id: TaskId,
        /// Payload size
        size_bytes: u64,
    },

    /// Task attempt failed
    TaskFailed {
        /// Task ID
        task_id: TaskId,
        /// Error message
        error: String,
        /// Error classification
        kind: FetchErrorKind,
        /// Retries performed so far
        retry_count: u32,
        /// False when this failure is terminal
        will_retry: bool,
    },

    /// Task scheduled for another attempt
    TaskRetrying {
        /// Task ID
        task_id: TaskId,
        /// Retry number
        retry_count: u32,
        /// Backoff before the retry starts
        delay_ms: u64,
    },

    /// In-flight task paused
    TaskPaused {
        /// Task ID
        task_id: TaskId,
    },

    /// Run paused
    RunPaused,

    /// Run resumed
    RunResumed {
        /// Number of paused tasks moved back to pending
        requeued: usize,
    },

    /// Run cancelled and registry cleared
    RunCancelled,

    /// A file was written to the output sink
    FileSaved {
        /// File name as written
        file_name: String,
        /// File size
        size_bytes: u64,
    },

    /// Every task reached a terminal state
    BatchComplete {
        /// Tasks that completed
        succeeded: usize,
        /// Tasks that failed
        failed: usize,
    },
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> TaskRecord {
        let reference = Arc::new(MediaReference::new(
            "7",
            "https://cdn.example.com/7.png",
            MediaKind::Image,
        ));
        TaskRecord::new(TaskId::new(MediaKind::Image, "7", 1_700_000_000_000, 0), reference)
    }

    #[test]
    fn task_id_combines_kind_id_time_and_sequence() {
        let id = TaskId::new(MediaKind::Video, "abc", 1_700_000_000_123, 4);
        assert_eq!(id.as_str(), "video-abc-1700000000123-4");
        assert_eq!(id.to_string(), "video-abc-1700000000123-4");
    }

    #[test]
    fn file_name_prefers_display_name() {
        let plain = MediaReference::new("9", "https://x/9", MediaKind::Video);
        assert_eq!(plain.file_name(), "video-9.mp4");

        let named = plain.clone().with_display_name("sunset loop");
        assert_eq!(named.file_name(), "sunset loop.mp4");

        let blank = plain.with_display_name("   ");
        assert_eq!(blank.file_name(), "video-9.mp4", "blank names fall back");
    }

    #[test]
    fn kinds_map_to_folders_and_extensions() {
        assert_eq!(MediaKind::Image.folder(), "images");
        assert_eq!(MediaKind::Image.extension(), "png");
        assert_eq!(MediaKind::Video.folder(), "videos");
        assert_eq!(MediaKind::Video.extension(), "mp4");
    }

    #[test]
    fn state_machine_rejects_illegal_transitions() {
        use TaskStatus::*;
        assert!(Pending.can_transition_to(Downloading));
        assert!(Downloading.can_transition_to(Paused));
        assert!(Failed.can_transition_to(Pending));
        assert!(Paused.can_transition_to(Pending));

        assert!(!Completed.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Paused.can_transition_to(Downloading));
        assert!(!Failed.can_transition_to(Downloading));
    }

    #[test]
    fn completing_sets_payload_and_full_progress() {
        let mut task = record();
        assert!(task.begin_attempt());
        assert!(task.complete(Bytes::from_static(b"png-bytes")));

        assert_eq!(task.status(), TaskStatus::Completed);
        assert_eq!(task.progress(), 100.0);
        assert_eq!(task.payload().unwrap().as_ref(), b"png-bytes");
        assert!(task.error_message().is_none());
    }

    #[test]
    fn payload_cannot_be_set_without_downloading() {
        let mut task = record();
        assert!(!task.complete(Bytes::from_static(b"x")));
        assert_eq!(task.status(), TaskStatus::Pending);
        assert!(task.payload().is_none());
    }

    #[test]
    fn failure_then_retry_clears_the_error() {
        let mut task = record();
        task.begin_attempt();
        assert!(task.fail(&FetchError::ServerError { status: 500 }));
        assert_eq!(task.error_message(), Some("server error (HTTP 500)"));
        assert_eq!(task.error_kind(), Some(FetchErrorKind::ServerError));

        assert!(task.schedule_retry());
        assert_eq!(task.status(), TaskStatus::Pending);
        assert_eq!(task.retry_count(), 1);
        assert!(task.error_message().is_none());
    }

    #[test]
    fn progress_is_monotonic_and_reset_per_attempt() {
        let mut task = record();
        task.begin_attempt();

        assert!(task.record_progress(50, Some(200)));
        assert_eq!(task.progress(), 25.0);
        assert!(!task.record_progress(10, Some(200)), "stale report must not regress");
        assert_eq!(task.progress(), 25.0);

        task.pause();
        task.requeue();
        task.begin_attempt();
        assert_eq!(task.progress(), 0.0);
        assert_eq!(task.bytes_received(), 0);
        assert_eq!(task.attempts(), 2);
    }

    #[test]
    fn unknown_total_keeps_progress_indeterminate() {
        let mut task = record();
        task.begin_attempt();

        assert!(!task.record_progress(4096, None));
        assert_eq!(task.progress(), 0.0);
        assert!(task.is_indeterminate());
        assert_eq!(task.bytes_received(), 4096);
    }

    #[test]
    fn partial_report_detection() {
        let report = |succeeded, failed| BatchReport {
            succeeded,
            failed,
            archive: None,
        };
        assert!(report(2, 1).is_partial());
        assert!(!report(3, 0).is_partial());
        assert!(!report(0, 3).is_partial());
    }

    #[test]
    fn events_serialize_with_snake_case_tag() {
        let event = Event::TaskRetrying {
            task_id: TaskId::new(MediaKind::Image, "1", 5, 0),
            retry_count: 2,
            delay_ms: 2000,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "task_retrying");
        assert_eq!(json["task_id"], "image-1-5-0");
        assert_eq!(json["delay_ms"], 2000);
    }
}
