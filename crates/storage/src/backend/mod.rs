//! Storage backend trait and implementations.
//!
//! This module defines the `StorageBackend` trait, a small async surface
//! for listing, reading and replacing whole files. The catalog stores one document per scan, so there is no
//! need for streaming readers or partial writes.

mod local;
#[cfg(feature = "mock")]
mod mock;

pub use self::local::LocalBackend;
#[cfg(feature = "mock")]
pub use self::mock::MockBackend;
use crate::error::Result;
use crate::models::FileInfo;
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::path::Path;
use std::pin::Pin;

pub(crate) type FileInfoStream<'a> = Pin<Box<dyn Stream<Item = Result<FileInfo>> + Send + 'a>>;

/// Unified interface for storage backends.
///
/// # Path Handling
/// All paths are relative to the storage root and must be validated using
/// [`validate_path`](crate::validate_path) before use. Implementations
/// enforce this validation.
///
/// # Atomicity
/// [`write()`](Self::write) must replace the whole file atomically: readers
/// see either the previous contents or the new contents, never a mix, and a
/// crash mid-write leaves the previous contents in place.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use scanwatch_storage::{backend::StorageBackend, error::Result};
///
/// async fn document_size(backend: &dyn StorageBackend) -> Result<usize> {
///     let path = Path::new("alpha.json");
///     if backend.exists(path).await? {
///         Ok(backend.read(path).await?.len())
///     } else {
///         Ok(0)
///     }
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the configured backend, used for logging only.
    fn name(&self) -> &str;

    /// List all files matching an optional prefix.
    ///
    /// Default implementation collects [`list_stream()`](Self::list_stream)
    /// into a [`Vec`].
    async fn list(&self, prefix: Option<&Path>) -> Result<Vec<FileInfo>> {
        self.list_stream(prefix).try_collect().await
    }

    /// Stream file metadata matching an optional prefix.
    ///
    /// Asking for a prefix that doesn't exist yields an empty stream, not an
    /// error.
    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a>;

    /// Check if a file exists.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Read file contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Atomically replace (or create) a file with the provided data.
    ///
    /// Parent directories are created as needed.
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()>;
}
