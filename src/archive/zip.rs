use std::io::{Cursor, Write};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::ArchiveBuilder;
use crate::config::ArchiveCompression;
use crate::error::ArchiveError;

/// Entries larger than this need ZIP64 headers
const ZIP64_THRESHOLD: usize = u32::MAX as usize;

/// In-memory ZIP writer
pub struct ZipArchiveBuilder {
    writer: ZipWriter<Cursor<Vec<u8>>>,
    method: CompressionMethod,
}

impl ZipArchiveBuilder {
    /// Create an empty archive using the given entry compression
    pub fn new(compression: ArchiveCompression) -> Self {
        let method = match compression {
            ArchiveCompression::Stored => CompressionMethod::Stored,
            ArchiveCompression::Deflated => CompressionMethod::Deflated,
        };

        Self {
            writer: ZipWriter::new(Cursor::new(Vec::new())),
            method,
        }
    }
}

impl ArchiveBuilder for ZipArchiveBuilder {
    fn append(&mut self, path: &str, data: &[u8]) -> Result<(), ArchiveError> {
        let options = FileOptions::default()
            .compression_method(self.method)
            .large_file(data.len() >= ZIP64_THRESHOLD);

        self.writer
            .start_file(path, options)
            .map_err(|e| ArchiveError::EntryFailed {
                entry: path.to_string(),
                reason: e.to_string(),
            })?;

        self.writer
            .write_all(data)
            .map_err(|e| ArchiveError::EntryFailed {
                entry: path.to_string(),
                reason: e.to_string(),
            })
    }

    fn finish(mut self: Box<Self>) -> Result<Vec<u8>, ArchiveError> {
        self.writer
            .finish()
            .map(Cursor::into_inner)
            .map_err(|e| ArchiveError::FinalizeFailed(e.to_string()))
    }

    fn extension(&self) -> &'static str {
        "zip"
    }
}
