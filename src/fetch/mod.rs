//! Media retrieval
//!
//! This module provides the retrieval unit used by the downloader: one GET per
//! task attempt, streamed, with progress reporting and error classification.
//!
//! ## Architecture
//!
//! The core abstraction is the [`MediaFetcher`] trait. The downloader owns a
//! `dyn MediaFetcher`, never touches the network itself, and applies whatever
//! the fetcher returns to the task registry.
//!
//! - [`HttpFetcher`]: reqwest implementation used by default
//!
//! A fetcher never mutates task records. Progress travels over the
//! [`ProgressReporter`] channel and the final result is returned as a
//! [`FetchOutcome`] or a classified [`FetchError`](crate::error::FetchError).
//!
//! ## Usage
//!
//! ```no_run
//! use media_batch_dl::config::DownloadConfig;
//! use media_batch_dl::fetch::{FetchOutcome, HttpFetcher, MediaFetcher, ProgressReporter};
//! use media_batch_dl::types::{MediaKind, MediaReference, TaskId};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let fetcher = HttpFetcher::new(&DownloadConfig::default())?;
//!     let reference = MediaReference::new("1", "https://example.com/cat.png", MediaKind::Image);
//!
//!     let (reporter, _progress_rx) =
//!         ProgressReporter::channel(TaskId::new(MediaKind::Image, "1", 0, 0));
//!     match fetcher.fetch(&reference, &reporter, &CancellationToken::new()).await? {
//!         FetchOutcome::Completed(bytes) => println!("got {} bytes", bytes.len()),
//!         FetchOutcome::Aborted => println!("aborted"),
//!     }
//!     Ok(())
//! }
//! ```

mod http;
mod traits;

pub use http::HttpFetcher;
pub use traits::{FetchOutcome, MediaFetcher, ProgressReporter, ProgressUpdate};

use crate::error::FetchError;
use crate::types::MediaReference;
use url::Url;

/// Check that a reference can be dispatched at all
///
/// Returns the parsed URL, or [`FetchError::InvalidReference`] for a missing,
/// malformed or non-HTTP URL. The downloader calls this before dispatch and
/// fails such tasks straight from `pending` without spending retries.
pub fn validate_reference(reference: &MediaReference) -> Result<Url, FetchError> {
    let raw = reference.url.trim();
    if raw.is_empty() {
        return Err(FetchError::InvalidReference {
            url: reference.url.clone(),
            reason: "missing URL".to_string(),
        });
    }

    let url = Url::parse(raw).map_err(|e| FetchError::InvalidReference {
        url: reference.url.clone(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(FetchError::InvalidReference {
            url: reference.url.clone(),
            reason: format!("unsupported scheme '{}'", other),
        }),
    }
}
