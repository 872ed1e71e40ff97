//! Catalog Error Types

use derive_more::{Display, Error};

/// A catalog error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for catalog operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// No catalog document exists for this scan.
    #[display("scan not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// The scan name has no usable characters left once sanitized.
    #[display("invalid scan name: {_0:?}")]
    InvalidName(#[error(not(source))] String),
    /// The document exists but could not be decoded, or breaks a catalog
    /// invariant (such as duplicate work ids).
    #[display("invalid catalog data for scan {_0}")]
    InvalidData(#[error(not(source))] String),
    /// Reading or writing the underlying storage failed.
    #[display("catalog persistence failed for scan {_0}")]
    Persistence(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_persistence_is_retryable() {
        assert!(ErrorKind::Persistence("alpha".to_string()).is_retryable());
        assert!(!ErrorKind::NotFound("alpha".to_string()).is_retryable());
        assert!(!ErrorKind::InvalidData("alpha".to_string()).is_retryable());
    }
}
