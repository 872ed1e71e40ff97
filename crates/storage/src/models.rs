//! Storage models.

use std::path::PathBuf;
use time::OffsetDateTime;

/// File metadata returned by storage backends when listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Relative path from storage root
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Last modified timestamp
    pub modified: OffsetDateTime,
}
impl FileInfo {
    pub fn new(path: impl Into<PathBuf>, size: u64, modified: OffsetDateTime) -> Self {
        Self { path: path.into(), size, modified }
    }

    /// File extension, if any (`"json"` for `"alpha.json"`).
    pub fn extension(&self) -> Option<&str> {
        self.path.extension().and_then(|e| e.to_str())
    }
}
