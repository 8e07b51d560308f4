use super::test_helpers::*;
use super::*;
use crate::error::{Error, FetchError, FetchErrorKind};
use crate::sink::ProgressSink;
use crate::types::{MediaKind, RunOutcome, TaskStatus};
use std::time::Duration;

mod control;

/// Start a run on a background task so the test can drive pause/cancel
fn spawn_start(
    downloader: &BatchDownloader,
    sink: Arc<dyn ProgressSink>,
) -> tokio::task::JoinHandle<crate::error::Result<RunOutcome>> {
    let downloader = downloader.clone();
    tokio::spawn(async move { downloader.start(sink).await })
}
