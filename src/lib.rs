//! # media-batch-dl
//!
//! Concurrent batch downloader for generated media (images and videos).
//!
//! ## Design Philosophy
//!
//! media-batch-dl is designed to be:
//! - **Bounded** - Never more than `max_concurrent_downloads` transfers at once
//! - **Resilient** - Transient failures are retried with linear backoff
//! - **Controllable** - Runs can be paused, resumed and cancelled at any time
//! - **Library-first** - No UI; progress goes to a sink and to subscribed event streams
//!
//! A batch is a list of [`MediaReference`]s. Each becomes a task that moves
//! through `pending -> downloading -> completed | failed`. When every task is
//! terminal, completed payloads are bundled into one ZIP archive (or saved
//! one by one) through an [`OutputSink`](sink::OutputSink).
//!
//! ## Quick Start
//!
//! ```no_run
//! use media_batch_dl::{BatchDownloader, Config, MediaKind, MediaReference, NoopProgress, RunOutcome};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let downloader = BatchDownloader::new(Config::default())?;
//!
//!     // Subscribe to events
//!     let mut events = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     downloader
//!         .add_tasks(vec![
//!             MediaReference::new("42", "https://cdn.example.com/42.png", MediaKind::Image)
//!                 .with_display_name("sunset"),
//!             MediaReference::new("7", "https://cdn.example.com/7.mp4", MediaKind::Video),
//!         ])
//!         .await;
//!
//!     match downloader.start(Arc::new(NoopProgress)).await? {
//!         RunOutcome::Completed(report) => {
//!             println!("{} ok, {} failed", report.succeeded, report.failed);
//!         }
//!         RunOutcome::Paused | RunOutcome::Cancelled => {}
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Archive aggregation
pub mod archive;
/// Configuration types
pub mod config;
/// Core downloader implementation (decomposed into focused submodules)
pub mod downloader;
/// Error types
pub mod error;
/// Media retrieval
pub mod fetch;
/// Task registry
pub mod registry;
/// Retry logic with linear backoff
pub mod retry;
/// Progress and output sinks
pub mod sink;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use archive::{ArchiveBuilder, ZipArchiveBuilder};
pub use config::{
    ArchiveCompression, ArchiveConfig, Config, DownloadConfig, FileCollisionAction, OutputConfig,
    RetryConfig,
};
pub use downloader::BatchDownloader;
pub use error::{ArchiveError, Error, FetchError, FetchErrorKind, OutputError, Result};
pub use fetch::{FetchOutcome, HttpFetcher, MediaFetcher, ProgressReporter};
pub use registry::TaskRegistry;
pub use retry::{IsRetryable, RetryDecision, RetryPolicy};
pub use sink::{CallbackSink, DirectorySink, MemorySink, NoopProgress, OutputSink, ProgressSink};
pub use types::{
    ArchiveOutput, BatchReport, BatchStats, Event, MediaKind, MediaReference, RunOutcome, TaskId,
    TaskRecord, TaskStatus,
};
