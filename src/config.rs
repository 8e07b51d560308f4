//! Configuration types for media-batch-dl

use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::error::{Error, Result};

/// Main configuration, supplied once per downloader
///
/// Every field has a sensible default, so `Config::default()` is a working
/// configuration: 3 concurrent downloads, 30 second timeout, 3 retries with a
/// linear 1 second backoff, and ZIP aggregation into `downloads.zip`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Retrieval behavior (concurrency, timeouts)
    #[serde(flatten)]
    pub download: DownloadConfig,

    /// Retry behavior for transient failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Archive aggregation settings
    #[serde(flatten)]
    pub archive: ArchiveConfig,

    /// Where finished files are written
    #[serde(default)]
    pub output: OutputConfig,
}

impl Config {
    /// Check the configuration for values the downloader cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.download.max_concurrent_downloads == 0 {
            return Err(Error::Config {
                message: "max_concurrent_downloads must be at least 1".to_string(),
                key: Some("max_concurrent_downloads".to_string()),
            });
        }

        if self.download.request_timeout.is_zero() {
            return Err(Error::Config {
                message: "request_timeout must be greater than zero".to_string(),
                key: Some("request_timeout".to_string()),
            });
        }

        let base_name = self.archive.archive_base_name.trim();
        if base_name.is_empty() {
            return Err(Error::Config {
                message: "archive_base_name must not be empty".to_string(),
                key: Some("archive_base_name".to_string()),
            });
        }
        if base_name.contains(['/', '\\']) {
            return Err(Error::Config {
                message: format!(
                    "archive_base_name must be a file name, not a path: {:?}",
                    base_name
                ),
                key: Some("archive_base_name".to_string()),
            });
        }

        Ok(())
    }
}

/// Retrieval behavior configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Maximum tasks in `downloading` at the same time (default: 3)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,

    /// Per-request timeout, covering headers and body (default: 30 seconds)
    #[serde(
        default = "default_request_timeout",
        rename = "request_timeout_ms",
        with = "duration_serde"
    )]
    pub request_timeout: Duration,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: default_max_concurrent(),
            request_timeout: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Retry configuration for transient failures
///
/// The delay before retry number `n` is `n * base_delay` (linear backoff).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries per task (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay unit for the linear backoff (default: 1 second)
    #[serde(
        default = "default_base_delay",
        rename = "base_delay_ms",
        with = "duration_serde"
    )]
    pub base_delay: Duration,

    /// Stretch each delay by a random factor in [1, 2] (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay: default_base_delay(),
            jitter: false,
        }
    }
}

/// Archive aggregation configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Bundle all completed payloads into one archive (default: true)
    ///
    /// When false, each payload is handed to the output sink as soon as it completes.
    #[serde(default = "default_true")]
    pub aggregate_as_archive: bool,

    /// Archive file name without extension (default: "downloads")
    #[serde(default = "default_archive_base_name")]
    pub archive_base_name: String,

    /// Compression applied to archive entries (default: stored)
    #[serde(default)]
    pub compression: ArchiveCompression,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            aggregate_as_archive: true,
            archive_base_name: default_archive_base_name(),
            compression: ArchiveCompression::default(),
        }
    }
}

/// Compression method for archive entries
///
/// Generated images and videos are already compressed, so entries are stored by default.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveCompression {
    /// No compression
    #[default]
    Stored,
    /// DEFLATE
    Deflated,
}

/// Output location configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory finished files and archives are written to (default: "downloads")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// What to do when a file with the same name already exists
    #[serde(default)]
    pub file_collision: FileCollisionAction,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            file_collision: FileCollisionAction::default(),
        }
    }
}

/// File collision handling
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCollisionAction {
    /// Append (1), (2), etc. to the file name (default)
    #[default]
    Rename,
    /// Overwrite the existing file
    Overwrite,
    /// Refuse to write
    Skip,
}

// Default value functions
fn default_max_concurrent() -> usize {
    3
}

fn default_request_timeout() -> Duration {
    Duration::from_millis(30_000)
}

fn default_user_agent() -> String {
    format!("media-batch-dl/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_millis(1000)
}

fn default_true() -> bool {
    true
}

fn default_archive_base_name() -> String {
    "downloads".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("downloads")
}

// Duration serialization helper (milliseconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
