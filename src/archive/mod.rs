//! Archive aggregation
//!
//! When a batch runs with `aggregate_as_archive`, every completed payload is
//! bundled into a single archive once all tasks are terminal. Entries appear in
//! registry insertion order at `<kind folder>/<name>.<ext>`:
//!
//! ```text
//! downloads.zip
//! ├── images/
//! │   ├── sunset.png
//! │   └── image-42.png
//! └── videos/
//!     └── video-7.mp4
//! ```
//!
//! The archive format sits behind the [`ArchiveBuilder`] trait;
//! [`ZipArchiveBuilder`] is the implementation used by the downloader.

mod zip;

pub use self::zip::ZipArchiveBuilder;

use bytes::Bytes;
use std::collections::HashSet;

use crate::config::ArchiveConfig;
use crate::error::ArchiveError;
use crate::types::{ArchiveOutput, MediaReference, TaskRecord, TaskStatus};
use crate::utils::{numbered_name, sanitize_file_name};

/// Incremental archive writer: append named entries, then finalize to one blob
pub trait ArchiveBuilder {
    /// Append one entry at `path` (forward-slash separated)
    fn append(&mut self, path: &str, data: &[u8]) -> Result<(), ArchiveError>;

    /// Finalize the archive and return its bytes
    fn finish(self: Box<Self>) -> Result<Vec<u8>, ArchiveError>;

    /// File extension of the produced archive, without the dot
    fn extension(&self) -> &'static str;
}

/// One planned archive entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path inside the archive
    pub path: String,
    /// Entry content
    pub data: Bytes,
}

/// Sanitized `<name>.<ext>` a reference is saved under
pub fn output_file_name(reference: &MediaReference) -> String {
    let fallback = format!("{}-{}", reference.kind.as_str(), reference.id);
    let stem = sanitize_file_name(&reference.file_stem(), &fallback);
    format!("{}.{}", stem, reference.kind.extension())
}

/// Plan the archive entries for a registry snapshot
///
/// Only `completed` tasks with a payload are included, in snapshot order.
/// Names are sanitized and repeated names get ` (1)`, ` (2)`, ... suffixes so
/// no entry overwrites another.
pub fn plan_entries(records: &[TaskRecord]) -> Vec<ArchiveEntry> {
    let mut used = HashSet::new();

    records
        .iter()
        .filter(|t| t.status() == TaskStatus::Completed)
        .filter_map(|task| {
            let payload = task.payload()?.clone();
            let reference = task.reference();
            let file_name = output_file_name(reference);
            let folder = reference.kind.folder();

            let mut path = format!("{}/{}", folder, file_name);
            let mut index = 1;
            while !used.insert(path.to_lowercase()) {
                path = format!("{}/{}", folder, numbered_name(&file_name, index));
                index += 1;
            }

            Some(ArchiveEntry {
                path,
                data: payload,
            })
        })
        .collect()
}

/// Write the planned entries through `builder` and name the result `<base>.<ext>`
pub fn write_archive(
    mut builder: Box<dyn ArchiveBuilder>,
    entries: &[ArchiveEntry],
    base_name: &str,
) -> Result<ArchiveOutput, ArchiveError> {
    let file_name = format!("{}.{}", base_name.trim(), builder.extension());

    for entry in entries {
        builder.append(&entry.path, &entry.data)?;
    }
    let bytes = builder.finish()?;

    tracing::debug!(
        file_name = %file_name,
        entries = entries.len(),
        size_bytes = bytes.len(),
        "archive finalized"
    );

    Ok(ArchiveOutput {
        file_name,
        entries: entries.iter().map(|e| e.path.clone()).collect(),
        bytes: Bytes::from(bytes),
    })
}

/// Build a ZIP archive of the completed tasks in `records`
pub fn build_archive(
    records: &[TaskRecord],
    config: &ArchiveConfig,
) -> Result<ArchiveOutput, ArchiveError> {
    let entries = plan_entries(records);
    let builder = Box::new(ZipArchiveBuilder::new(config.compression));
    write_archive(builder, &entries, &config.archive_base_name)
}
