//! In-memory storage backend for testing.

use super::FileInfoStream;
use crate::StorageBackend;
use crate::error::{ErrorKind, Result};
use crate::models::FileInfo;
use crate::path::validate as validate_path;
use async_stream::stream;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use time::OffsetDateTime;
use tokio::sync::RwLock;

/// In-memory storage backend for testing.
///
/// Files are stored in a `HashMap` behind a [`RwLock`]. Writes replace the
/// whole entry under the write lock, which satisfies the atomicity contract of
/// [`StorageBackend::write()`] trivially.
///
/// Writes can be made to fail on demand with
/// [`fail_writes()`](Self::fail_writes), for exercising crash-between-steps
/// behaviour in callers.
///
/// # Examples
///
/// ```
/// use scanwatch_storage::backend::{MockBackend, StorageBackend};
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::with_files([("alpha.json", b"{}")]);
/// assert!(backend.exists(Path::new("alpha.json")).await?);
/// # Ok(())
/// # }
/// ```
pub struct MockBackend {
    name: String,
    storage: RwLock<HashMap<PathBuf, (OffsetDateTime, Vec<u8>)>>,
    fail_writes: AtomicBool,
}

impl MockBackend {
    /// Create a mock backend pre-populated with files.
    ///
    /// Panics if any path fails validation. If test setup is wrong, then the
    /// test should not pass.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let now = OffsetDateTime::now_utc();
        let mut map = HashMap::new();
        for (path, data) in files {
            let path = path.into();
            let Ok(validated) = validate_path(&path) else {
                panic!("MockBackend::with_files: invalid path {}", path.display());
            };
            map.insert(validated, (now, data.into()));
        }
        Self {
            name: "mock".to_string(),
            storage: RwLock::new(map),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Change the name of the mock backend.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Make every subsequent `write()` fail with a backend error (or stop
    /// doing so).
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}
impl Default for MockBackend {
    fn default() -> Self {
        let files: [(&str, &str); 0] = [];
        Self::with_files(files)
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        let validated_prefix = match prefix.map(validate_path).transpose() {
            Ok(pfx) => pfx,
            Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
        };

        Box::pin(stream! {
            // Snapshot under the read lock; don't hold it across yield points.
            let entries: Vec<FileInfo> = {
                let guard = self.storage.read().await;
                let mut entries: Vec<_> = guard
                    .iter()
                    .filter(|(path, _)| validated_prefix.as_ref().is_none_or(|pfx| path.starts_with(pfx)))
                    .map(|(path, (modified, data))| FileInfo::new(path.clone(), data.len() as u64, *modified))
                    .collect();
                entries.sort_by(|a, b| a.path.cmp(&b.path));
                entries
            };
            for info in entries {
                yield Ok(info);
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let path = validate_path(path)?;
        Ok(self.storage.read().await.contains_key(&path))
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let path = validate_path(path)?;
        let (_modified, data) =
            self.storage.read().await.get(&path).cloned().ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path)))?;
        Ok(data)
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let path = validate_path(path)?;
        if self.fail_writes.load(Ordering::SeqCst) {
            exn::bail!(ErrorKind::BackendError(format!("write to {} refused by mock", path.display())));
        }
        self.storage.write().await.insert(path, (OffsetDateTime::now_utc(), data.to_vec()));
        Ok(())
    }

}
