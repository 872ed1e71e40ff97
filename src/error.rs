//! Tracker Error Types

use derive_more::{Display, Error};

/// A tracker error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for tracker operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The configuration couldn't be loaded or is invalid; fix it.
    #[display("configuration error")]
    Config,
    /// The catalog directory can't be used.
    #[display("catalog storage error")]
    Storage,
    #[display("database error")]
    Database,
    /// Reading the catalog failed.
    #[display("catalog error")]
    Catalog,
    #[display("update check failed")]
    Update,
    #[display("quarantine operation failed")]
    Quarantine,
    #[display("could not write output")]
    Output,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database | Self::Catalog | Self::Update | Self::Quarantine)
    }
}
