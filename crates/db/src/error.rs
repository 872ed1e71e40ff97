//! Database Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A database error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for database operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("database error")]
    Database,
    #[display("database migration error")]
    Migration,
    /// A stored value can't be converted to or from its model (the field is
    /// named).
    #[display("invalid stored data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        // SQLITE_BUSY and friends surface as plain database errors.
        matches!(self, Self::Database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(ErrorKind::Database.is_retryable());
        assert!(!ErrorKind::Migration.is_retryable());
        assert!(!ErrorKind::InvalidData("action").is_retryable());
        assert_eq!(ErrorKind::InvalidData("action").to_string(), "invalid stored data: action");
    }
}
