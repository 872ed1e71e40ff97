//! Path validation.
//!
//! Every path handed to a backend is relative to that backend's root. These
//! helpers make sure it stays that way.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Validates and normalizes a storage path.
///
/// `.` components and repeated separators are dropped, `..` is resolved
/// lexically, and anything that would leave the storage root (or contains a
/// NUL byte, or is a Windows drive prefix, or resolves to nothing) is rejected
/// with [`InvalidPath`](crate::error::ErrorKind::InvalidPath).
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use scanwatch_storage::validate_path;
///
/// assert!(validate_path("alpha.json").is_ok());
/// assert!(validate_path("../alpha.json").is_err());
/// assert_eq!(validate_path("./scans//beta.json").unwrap(), Path::new("scans/beta.json"));
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let original = path.as_ref();
    let reject = || exn::Exn::from(ErrorKind::InvalidPath(original.to_path_buf()));
    let mut normalized = Vec::new();
    for component in original.components() {
        match component {
            Component::Normal(segment) => {
                // Path::components() lets NUL through on Unix; syscalls would truncate at it.
                if segment.as_encoded_bytes().contains(&0) {
                    return Err(reject());
                }
                normalized.push(segment);
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => return Err(reject()),
            Component::ParentDir => {
                if normalized.pop().is_none() {
                    return Err(reject());
                }
            },
        }
    }
    if normalized.is_empty() {
        return Err(reject());
    }
    Ok(normalized.into_iter().collect())
}
