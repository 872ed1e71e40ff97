//! Local filesystem storage backend.
//!
//! Files are stored in a configured directory and accessed via `tokio::fs`.
//! Writes go to a hidden sibling temporary file which is flushed to disk and
//! then renamed over the target, which is atomic on POSIX filesystems.

use crate::backend::FileInfoStream;
use crate::error::ErrorKind;
use crate::{FileInfo, StorageBackend, error::Result, path::validate as validate_path};
use async_stream::stream;
use async_trait::async_trait;
use exn::ResultExt;
use std::collections::VecDeque;
use std::fs::{Metadata, create_dir_all as sync_create_dir};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const TEMP_SUFFIX: &str = ".tmp";
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// What one directory contributes to a listing.
#[derive(Default)]
struct DirListing {
    files: Vec<FileInfo>,
    subdirs: Vec<PathBuf>,
}

/// Local filesystem storage backend.
///
/// # Examples
///
/// ```no_run
/// use scanwatch_storage::backend::LocalBackend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = LocalBackend::new("catalog", "/var/lib/scanwatch/catalog")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LocalBackend {
    name: String,
    root: PathBuf,
}
impl LocalBackend {
    /// Create a new local filesystem backend rooted at an absolute path.
    ///
    /// The root directory is created if it doesn't exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidPath`](ErrorKind::InvalidPath) if the path is
    /// relative or points at something other than a directory.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::InvalidPath(root));
            }
        } else {
            // Only happens once at startup; not worth making the constructor async.
            sync_create_dir(&root).map_err(|e| Self::map_io_error(e, &root))?;
        }
        Ok(Self { name: name.into(), root })
    }

    fn absolute_path(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let validated = validate_path(path.as_ref())?;
        Ok(self.root.join(validated))
    }

    fn relative_path(&self, absolute: impl AsRef<Path>) -> Result<PathBuf> {
        let absolute = absolute.as_ref();
        let relative = absolute.strip_prefix(&self.root).or_raise(|| {
            ErrorKind::BackendError(format!("path `{:?}` is not within root `{:?}`", absolute, self.root))
        })?;
        validate_path(relative)
    }

    /// Hidden sibling of `target`, unique per process and call.
    fn temp_path(target: &Path) -> PathBuf {
        let file_name = target.file_name().and_then(|n| n.to_str()).unwrap_or("document");
        let unique = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        target.with_file_name(format!(".{file_name}.{}.{unique}{TEMP_SUFFIX}", std::process::id()))
    }

    fn is_temp_file(path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.') && n.ends_with(TEMP_SUFFIX))
    }

    fn metadata(path: &Path, metadata: Metadata) -> Result<FileInfo> {
        let modified = metadata.modified().map_err(ErrorKind::Io)?.into();
        Ok(FileInfo::new(path, metadata.len(), modified))
    }

    fn map_io_error(e: std::io::Error, path: &Path) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
            _ => ErrorKind::Io(e),
        }
    }

    /// Files directly inside `dir` (sorted by path) and the subdirectories
    /// still to visit, both restricted to `prefix`. A missing directory lists
    /// as empty.
    async fn read_directory(&self, dir: &Path, prefix: Option<&Path>) -> Result<DirListing> {
        let mut listing = DirListing::default();
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(listing),
            Err(e) => exn::bail!(Self::map_io_error(e, dir)),
        };
        while let Some(entry) = entries.next_entry().await.map_err(|e| Self::map_io_error(e, dir))? {
            let path = entry.path();
            let relative = self.relative_path(&path)?;
            if prefix.is_some_and(|pfx| !relative.starts_with(pfx)) {
                continue;
            }
            let file_type = entry.file_type().await.map_err(|e| Self::map_io_error(e, &path))?;
            if file_type.is_dir() {
                listing.subdirs.push(path);
            } else if file_type.is_file() && !Self::is_temp_file(&relative) {
                // Leftovers from an interrupted write are never real documents.
                let metadata = entry.metadata().await.map_err(|e| Self::map_io_error(e, &path))?;
                listing.files.push(Self::metadata(&relative, metadata)?);
            }
        }
        listing.files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(listing)
    }

    async fn write_atomic(&self, target: &Path, data: &[u8]) -> std::io::Result<()> {
        let temp = Self::temp_path(target);
        let result = async {
            let mut file = fs::File::create(&temp).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp, target).await
        }
        .await;
        if result.is_err() {
            // Best effort; the temp file is invisible to listings anyway.
            _ = fs::remove_file(&temp).await;
        }
        result
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    /// Breadth first: every file of a directory comes before anything
    /// below it. A directory that can't be read yields one error and the walk
    /// carries on with the rest.
    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        let prefix = match prefix.map(validate_path).transpose() {
            Ok(prefix) => prefix,
            Err(e) => return Box::pin(futures::stream::once(async { Result::Err(e) })),
        };
        // Start at the prefix's parent so a prefix naming a single file matches.
        let first = match &prefix {
            Some(prefix) => self.root.join(prefix).parent().map_or_else(|| self.root.clone(), Path::to_path_buf),
            None => self.root.clone(),
        };
        let mut pending = VecDeque::from([first]);

        Box::pin(stream! {
            while let Some(dir) = pending.pop_front() {
                match self.read_directory(&dir, prefix.as_deref()).await {
                    Ok(listing) => {
                        pending.extend(listing.subdirs);
                        for file in listing.files {
                            yield Ok(file);
                        }
                    },
                    Err(e) => yield Err(e),
                }
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let abs_path = self.absolute_path(path)?;
        Ok(fs::try_exists(&abs_path).await.map_err(ErrorKind::Io)?)
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let abs_path = self.absolute_path(path)?;
        Ok(fs::read(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?)
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let abs_path = self.absolute_path(path)?;
        if let Some(parent) = abs_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| Self::map_io_error(e, path))?;
        }
        Ok(self.write_atomic(&abs_path, data).await.map_err(|e| Self::map_io_error(e, path))?)
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> (tempfile::TempDir, LocalBackend) {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("catalog", temp_dir.path()).unwrap();
        (temp_dir, backend)
    }

    #[test]
    fn test_new_requires_absolute_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(LocalBackend::new("catalog", temp_dir.path()).is_ok());
        assert!(LocalBackend::new("catalog", "relative/path").is_err());
    }

    #[test]
    fn test_new_creates_missing_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("nested/catalog");
        LocalBackend::new("catalog", &root).unwrap();
        assert!(root.is_dir());
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let (_dir, backend) = backend();
        backend.write(Path::new("alpha.json"), b"{}").await.unwrap();
        assert_eq!(backend.read(Path::new("alpha.json")).await.unwrap(), b"{}");
    }

    #[tokio::test]
    async fn test_write_replaces_whole_file() {
        let (_dir, backend) = backend();
        backend.write(Path::new("alpha.json"), b"a much longer first version").await.unwrap();
        backend.write(Path::new("alpha.json"), b"short").await.unwrap();
        assert_eq!(backend.read(Path::new("alpha.json")).await.unwrap(), b"short");
    }

    #[tokio::test]
    async fn test_write_leaves_no_temp_files() {
        let (dir, backend) = backend();
        backend.write(Path::new("alpha.json"), b"{}").await.unwrap();
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["alpha.json".to_string()]);
    }

    #[tokio::test]
    async fn test_list_skips_interrupted_writes() {
        let (dir, backend) = backend();
        backend.write(Path::new("alpha.json"), b"{}").await.unwrap();
        std::fs::write(dir.path().join(".beta.json.1.0.tmp"), b"{").unwrap();
        let files = backend.list(None).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, Path::new("alpha.json"));
        assert_eq!(files[0].extension(), Some("json"));
    }

    #[tokio::test]
    async fn test_write_creates_directories() {
        let (_dir, backend) = backend();
        backend.write(Path::new("a/b/alpha.json"), b"{}").await.unwrap();
        assert!(backend.exists(Path::new("a/b/alpha.json")).await.unwrap());
    }

    #[tokio::test]
    async fn test_read_not_found() {
        let (_dir, backend) = backend();
        let err = backend.read(Path::new("missing.json")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_is_breadth_first_and_sorted() {
        let (_dir, backend) = backend();
        for path in ["beta.json", "archive/old/zeta.json", "archive/delta.json", "alpha.json"] {
            backend.write(Path::new(path), b"{}").await.unwrap();
        }
        let paths: Vec<_> = backend.list(None).await.unwrap().into_iter().map(|f| f.path).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("alpha.json"),
                PathBuf::from("beta.json"),
                PathBuf::from("archive/delta.json"),
                PathBuf::from("archive/old/zeta.json"),
            ]
        );
    }

    #[tokio::test]
    async fn test_list_with_prefix() {
        let (_dir, backend) = backend();
        backend.write(Path::new("archive/alpha.json"), b"{}").await.unwrap();
        backend.write(Path::new("beta.json"), b"{}").await.unwrap();
        assert_eq!(backend.list(None).await.unwrap().len(), 2);
        let archived = backend.list(Some(Path::new("archive/"))).await.unwrap();
        assert_eq!(archived.len(), 1);
        assert!(backend.list(Some(Path::new("nonexistent/"))).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_path_security() {
        let (_dir, backend) = backend();
        assert!(backend.read(Path::new("../etc/passwd")).await.is_err());
        assert!(backend.write(Path::new("../escape.json"), b"{}").await.is_err());
    }
}
