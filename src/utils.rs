//! Utility functions for file naming and path manipulation

use crate::config::FileCollisionAction;
use crate::error::{Error, OutputError, Result};
use std::path::{Path, PathBuf};

/// Maximum number of rename attempts when resolving file collisions
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Longest file name (in characters, extension excluded) kept by [`sanitize_file_name`]
const MAX_STEM_CHARS: usize = 200;

/// Make a caller-supplied name safe to use as a single path component
///
/// Path separators, characters reserved on Windows and control characters are
/// replaced with `_`, surrounding whitespace and dots are trimmed, and overly long
/// names are truncated. Returns `fallback` when nothing usable remains.
///
/// # Examples
///
/// ```
/// use media_batch_dl::utils::sanitize_file_name;
///
/// assert_eq!(sanitize_file_name("cats/dogs: v2", "image-1"), "cats_dogs_ v2");
/// assert_eq!(sanitize_file_name(" .. ", "image-1"), "image-1");
/// ```
#[must_use]
pub fn sanitize_file_name(name: &str, fallback: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .take(MAX_STEM_CHARS)
        .collect();

    let trimmed = cleaned.trim().trim_matches('.').trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Build the `index`-th alternative for a file name: `name (1).png`, `name (2).png`, ...
pub(crate) fn numbered_name(file_name: &str, index: u32) -> String {
    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{} ({}).{}", stem, index, ext),
        None => format!("{} ({})", stem, index),
    }
}

/// Get a unique path for a file, handling collisions according to the specified action
///
/// # Arguments
///
/// * `path` - The desired file path
/// * `action` - How to handle file collisions
///
/// # Returns
///
/// Returns the final path to use. For Rename action, this may have a suffix added.
/// For Skip action, returns an error if the file already exists.
/// For Overwrite action, returns the original path unchanged.
pub fn get_unique_path(path: &Path, action: FileCollisionAction) -> Result<PathBuf> {
    match action {
        FileCollisionAction::Overwrite => Ok(path.to_path_buf()),
        FileCollisionAction::Skip => {
            if path.exists() {
                return Err(Error::Output(OutputError::FileCollision {
                    path: path.to_path_buf(),
                    reason: "file already exists and collision action is Skip".to_string(),
                }));
            }
            Ok(path.to_path_buf())
        }
        FileCollisionAction::Rename => {
            if !path.exists() {
                return Ok(path.to_path_buf());
            }

            let file_name = path.file_name().and_then(|s| s.to_str()).ok_or_else(|| {
                Error::Output(OutputError::InvalidPath {
                    path: path.to_path_buf(),
                    reason: "cannot extract file name".to_string(),
                })
            })?;

            let parent = path.parent().ok_or_else(|| {
                Error::Output(OutputError::InvalidPath {
                    path: path.to_path_buf(),
                    reason: "cannot extract parent directory".to_string(),
                })
            })?;

            for i in 1..=MAX_RENAME_ATTEMPTS {
                let new_path = parent.join(numbered_name(file_name, i));
                if !new_path.exists() {
                    return Ok(new_path);
                }
            }

            Err(Error::Output(OutputError::FileCollision {
                path: path.to_path_buf(),
                reason: format!(
                    "could not find unique filename after {} attempts",
                    MAX_RENAME_ATTEMPTS
                ),
            }))
        }
    }
}
