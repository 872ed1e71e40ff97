//! Catalog store: one JSON document per scan on a storage backend.

use crate::Scan;
use crate::error::{ErrorKind, Result};
use dashmap::DashMap;
use exn::ResultExt;
use scanwatch_storage::BackendHandle;
use scanwatch_storage::error::ErrorKind as StorageErrorKind;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

const EXTENSION: &str = "json";

/// Map a scan name onto its document file name.
///
/// Everything but ASCII alphanumerics, `.`, `_` and `-` is dropped and the
/// result is lowercased, so `"Alpha Scans!"` lives in `alphascans.json`.
pub fn document_name(scan_name: &str) -> Result<String> {
    let safe: String = scan_name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect::<String>()
        .to_lowercase();
    // Only dots left would make a hidden file or a path component like `..`.
    if safe.chars().all(|c| c == '.') {
        exn::bail!(ErrorKind::InvalidName(scan_name.to_string()));
    }
    Ok(format!("{safe}.{EXTENSION}"))
}

/// Whether `name` can be used verbatim as a document file stem.
fn is_plain_stem(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('.') && !name.contains(['/', '\\', '\0'])
}

fn stem_of(path: &Path) -> Option<&str> {
    path.file_stem().and_then(|s| s.to_str())
}

/// Persistent store of scan catalogs.
///
/// A scan is identified by its **key**: the file stem of the document
/// holding it. New scans get [`document_name()`] as their file, so `"Beta"`
/// and `"beta"` are the same scan with key `beta`. A document added by hand
/// under a stem that isn't sanitized (`Reaper Scans.json`) is still
/// reachable by that exact stem, unless the sanitized document also exists.
/// [`list_scans()`](Catalog::list_scans) returns keys, and every key it
/// returns loads.
///
/// Reads never lock: the backend guarantees whole-file atomic writes, so a
/// load always sees a complete document. Writes, and any read-modify-write
/// sequence, go through a [`ScanGuard`] holding that scan's exclusive lock.
/// Scans that map to different documents never contend.
pub struct Catalog {
    backend: BackendHandle,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Catalog {
    pub fn new(backend: BackendHandle) -> Self {
        Self { backend, locks: DashMap::new() }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Keys of every scan in the catalog, sorted.
    ///
    /// Documents are not decoded here: one that is broken is still listed,
    /// so callers get a proper error from [`load()`](Self::load) instead of
    /// the scan silently disappearing.
    pub async fn list_scans(&self) -> Result<BTreeSet<String>> {
        let files = self.backend.list(None).await.or_raise(|| ErrorKind::Persistence("*".to_string()))?;
        // Only top-level documents; anything nested is not ours.
        let documents: BTreeSet<String> = files
            .iter()
            .filter(|file| file.extension() == Some(EXTENSION) && file.path.components().count() == 1)
            .filter_map(|file| file.path.file_name().and_then(|n| n.to_str()).map(str::to_string))
            .collect();
        let mut keys = BTreeSet::new();
        for document in &documents {
            let Some(stem) = stem_of(Path::new(document)).filter(|stem| is_plain_stem(stem)) else {
                continue;
            };
            match document_name(stem) {
                Ok(canonical) if canonical != *document && documents.contains(&canonical) => {
                    tracing::warn!(document = %document, shadowed_by = %canonical, "ignoring shadowed catalog document");
                },
                _ => {
                    keys.insert(stem.to_string());
                },
            }
        }
        Ok(keys)
    }

    /// The key of the scan `name` refers to. The scan doesn't have to exist
    /// yet.
    pub async fn resolve(&self, name: &str) -> Result<String> {
        let path = self.locate(name).await?;
        Ok(stem_of(&path).unwrap_or(name).to_string())
    }

    /// Load a scan's catalog.
    pub async fn load(&self, name: &str) -> Result<Scan> {
        let path = self.locate(name).await?;
        self.decode(name, &path).await
    }

    /// Atomically replace a scan's catalog, taking the scan's lock for the
    /// duration of the write.
    ///
    /// Don't call this while holding a [`ScanGuard`] for the same scan; use
    /// [`ScanGuard::save()`] instead.
    pub async fn save(&self, name: &str, scan: &Scan) -> Result<()> {
        self.lock(name).await?.save(scan).await
    }

    /// Acquire the exclusive lock for a scan.
    ///
    /// The lock is held until the returned guard is dropped. Anything that
    /// loads, mutates and saves a scan must hold it across all three steps.
    pub async fn lock(&self, name: &str) -> Result<ScanGuard<'_>> {
        let path = self.locate(name).await?;
        let key = stem_of(&path).unwrap_or(name).to_string();
        let mutex = self.locks.entry(key.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone();
        let guard = mutex.lock_owned().await;
        Ok(ScanGuard {
            catalog: self,
            name: name.to_string(),
            key,
            path,
            _guard: guard,
        })
    }

    /// Find the document for a scan name: the sanitized document if it
    /// exists, else a document named after `name` verbatim if that exists,
    /// else the sanitized document (for a scan about to be created).
    async fn locate(&self, name: &str) -> Result<PathBuf> {
        let verbatim = is_plain_stem(name).then(|| PathBuf::from(format!("{name}.{EXTENSION}")));
        let canonical = match (document_name(name), verbatim) {
            (Ok(canonical), Some(verbatim)) if verbatim.as_os_str() != canonical.as_str() => {
                let canonical = PathBuf::from(canonical);
                if !self.exists(name, &canonical).await? && self.exists(name, &verbatim).await? {
                    return Ok(verbatim);
                }
                canonical
            },
            (Ok(canonical), _) => PathBuf::from(canonical),
            (Err(e), Some(verbatim)) => {
                if self.exists(name, &verbatim).await? {
                    return Ok(verbatim);
                }
                return Err(e);
            },
            (Err(e), None) => return Err(e),
        };
        Ok(canonical)
    }

    async fn exists(&self, name: &str, path: &Path) -> Result<bool> {
        self.backend.exists(path).await.or_raise(|| ErrorKind::Persistence(name.to_string()))
    }

    async fn decode(&self, name: &str, path: &Path) -> Result<Scan> {
        let bytes = match self.backend.read(path).await {
            Ok(bytes) => bytes,
            Err(e) if matches!(&*e, StorageErrorKind::NotFound(_)) => {
                exn::bail!(ErrorKind::NotFound(name.to_string()))
            },
            Err(e) => return Err(e.raise(ErrorKind::Persistence(name.to_string()))),
        };
        let scan: Scan = serde_json::from_slice(&bytes).or_raise(|| ErrorKind::InvalidData(name.to_string()))?;
        if let Some(id) = scan.duplicate_work_id() {
            tracing::warn!(scan = %name, work = %id, "duplicate work id in catalog document");
            exn::bail!(ErrorKind::InvalidData(name.to_string()));
        }
        Ok(scan)
    }
}

/// Exclusive access to one scan's catalog document.
pub struct ScanGuard<'a> {
    catalog: &'a Catalog,
    name: String,
    key: String,
    path: PathBuf,
    _guard: OwnedMutexGuard<()>,
}

impl ScanGuard<'_> {
    /// The name the scan was asked for by.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The scan's key. Anything recorded about the scan outside the catalog
    /// (quarantine events, cache entries) is filed under this.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn load(&self) -> Result<Scan> {
        self.catalog.decode(&self.name, &self.path).await
    }

    /// Atomically replace the scan's document.
    pub async fn save(&self, scan: &Scan) -> Result<()> {
        if let Some(id) = scan.duplicate_work_id() {
            tracing::warn!(scan = %self.name, work = %id, "refusing to save duplicate work id");
            exn::bail!(ErrorKind::InvalidData(self.name.clone()));
        }
        let bytes = serde_json::to_vec_pretty(scan).or_raise(|| ErrorKind::InvalidData(self.name.clone()))?;
        self.catalog
            .backend
            .write(&self.path, &bytes)
            .await
            .or_raise(|| ErrorKind::Persistence(self.name.clone()))?;
        tracing::debug!(scan = %self.name, works = scan.works.len(), "saved catalog");
        Ok(())
    }
}
