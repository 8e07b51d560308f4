//! Traits and types for media retrieval

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::FetchError;
use crate::types::{MediaReference, TaskId};

/// Progress of one attempt, sent from a fetcher to the run loop
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// Task the progress belongs to
    pub task_id: TaskId,
    /// Attempt number the update was produced by
    pub attempt: u32,
    /// Bytes received so far
    pub received: u64,
    /// Total size, when the server announced one
    pub total: Option<u64>,
}

/// Sending half of the progress channel handed to a fetcher
///
/// Reports are tagged with the attempt number, so late updates from an
/// abandoned attempt are recognized and dropped by the receiver.
#[derive(Clone, Debug)]
pub struct ProgressReporter {
    task_id: TaskId,
    attempt: u32,
    tx: mpsc::UnboundedSender<ProgressUpdate>,
}

impl ProgressReporter {
    /// Create a reporter for one attempt
    pub fn new(task_id: TaskId, attempt: u32, tx: mpsc::UnboundedSender<ProgressUpdate>) -> Self {
        Self {
            task_id,
            attempt,
            tx,
        }
    }

    /// Create a reporter for attempt 1 together with its receiving end
    pub fn channel(task_id: TaskId) -> (Self, mpsc::UnboundedReceiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(task_id, 1, tx), rx)
    }

    /// Report bytes received so far
    ///
    /// Never blocks. Updates are silently dropped once the receiver is gone.
    pub fn report(&self, received: u64, total: Option<u64>) {
        self.tx
            .send(ProgressUpdate {
                task_id: self.task_id.clone(),
                attempt: self.attempt,
                received,
                total,
            })
            .ok();
    }
}

/// Successful end of a fetch
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The whole payload was received
    Completed(Bytes),
    /// The cancellation token fired before the transfer finished
    Aborted,
}

/// Trait for retrieving one media payload
///
/// Implementations must check `cancel` while waiting for the response and
/// between body chunks, and return [`FetchOutcome::Aborted`] once it fires.
/// Failures are returned as classified [`FetchError`]s; the caller decides
/// whether to retry.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Retrieve the payload behind `reference`
    async fn fetch(
        &self,
        reference: &MediaReference,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, FetchError>;
}
