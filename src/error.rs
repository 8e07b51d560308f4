//! Error types for media-batch-dl
//!
//! Errors come in two tiers:
//! - [`FetchError`] - per-task retrieval failures. These are recorded on the
//!   task record and drive the retry policy; they never abort a batch.
//! - [`Error`] - batch-level failures returned from the public API
//!   (empty batch, total failure, archive build failure, invalid configuration).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for media-batch-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for media-batch-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_concurrent_downloads")
        key: Option<String>,
    },

    /// `start()` was called with no tasks in the registry
    #[error("batch is empty: add tasks before starting")]
    EmptyBatch,

    /// Every task in the batch ended in `failed`
    #[error("all {failed} downloads failed")]
    TotalFailure {
        /// Number of tasks that failed
        failed: usize,
    },

    /// A run is already in progress on this downloader
    #[error("a batch run is already in progress")]
    AlreadyRunning,

    /// Building the archive failed after all downloads finished
    #[error("archive build error: {0}")]
    Archive(#[from] ArchiveError),

    /// Writing a file to the output sink failed
    #[error("output error: {0}")]
    Output(#[from] OutputError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client construction error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Machine-readable error code, suitable for UI layers that map errors to messages
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::EmptyBatch => "empty_batch",
            Error::TotalFailure { .. } => "total_failure",
            Error::AlreadyRunning => "already_running",
            Error::Archive(_) => "archive_build_error",
            Error::Output(e) => match e {
                OutputError::FileCollision { .. } => "file_collision",
                OutputError::InvalidPath { .. } => "invalid_path",
            },
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Other(_) => "internal_error",
        }
    }
}

/// Archive aggregation errors
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// An entry could not be appended to the archive
    #[error("failed to add entry {entry}: {reason}")]
    EntryFailed {
        /// Path of the entry inside the archive
        entry: String,
        /// The reason the entry could not be written
        reason: String,
    },

    /// The archive could not be finalized
    #[error("failed to finalize archive: {0}")]
    FinalizeFailed(String),
}

/// Output sink errors
#[derive(Debug, Error)]
pub enum OutputError {
    /// File collision at destination
    #[error("file collision at {path}: {reason}")]
    FileCollision {
        /// The path where the collision occurred
        path: PathBuf,
        /// The reason for the collision (e.g., "file already exists")
        reason: String,
    },

    /// Invalid destination path
    #[error("invalid path {path}: {reason}")]
    InvalidPath {
        /// The invalid path
        path: PathBuf,
        /// The reason the path is invalid
        reason: String,
    },
}

/// Classification of a per-task retrieval failure
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    /// HTTP 404
    NotFound,
    /// HTTP 403
    AccessDenied,
    /// HTTP 5xx
    ServerError,
    /// Connection, DNS or mid-stream transport failure
    NetworkError,
    /// Request exceeded the configured timeout
    Timeout,
    /// Any other non-2xx status
    GenericHttpError,
    /// Malformed or missing URL, detected before dispatch
    InvalidReference,
}

/// Per-task retrieval error produced by a [`MediaFetcher`](crate::fetch::MediaFetcher)
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FetchError {
    /// The server answered 404
    #[error("media not found (HTTP 404)")]
    NotFound,

    /// The server answered 403
    #[error("access denied (HTTP 403)")]
    AccessDenied,

    /// The server answered with a 5xx status
    #[error("server error (HTTP {status})")]
    ServerError {
        /// The HTTP status code
        status: u16,
    },

    /// Transport-level failure
    #[error("network error: {0}")]
    Network(String),

    /// The request did not finish in time
    #[error("request timed out after {}ms", .after.as_millis())]
    Timeout {
        /// The configured request timeout
        after: Duration,
    },

    /// Any other non-success status
    #[error("HTTP error {status}")]
    Http {
        /// The HTTP status code
        status: u16,
    },

    /// The reference URL is malformed or unsupported
    #[error("invalid reference {url:?}: {reason}")]
    InvalidReference {
        /// The offending URL as supplied by the caller
        url: String,
        /// Why it was rejected
        reason: String,
    },
}

impl FetchError {
    /// Classify a non-success HTTP status
    pub fn from_status(status: u16) -> Self {
        match status {
            404 => FetchError::NotFound,
            403 => FetchError::AccessDenied,
            500..=599 => FetchError::ServerError { status },
            _ => FetchError::Http { status },
        }
    }

    /// The classification of this error
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::NotFound => FetchErrorKind::NotFound,
            FetchError::AccessDenied => FetchErrorKind::AccessDenied,
            FetchError::ServerError { .. } => FetchErrorKind::ServerError,
            FetchError::Network(_) => FetchErrorKind::NetworkError,
            FetchError::Timeout { .. } => FetchErrorKind::Timeout,
            FetchError::Http { .. } => FetchErrorKind::GenericHttpError,
            FetchError::InvalidReference { .. } => FetchErrorKind::InvalidReference,
        }
    }
}
