//! Quarantine Error Types

use derive_more::{Display, Error};

/// A quarantine error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for quarantine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("scan not found: {_0}")]
    ScanNotFound(#[error(not(source))] String),
    #[display("work {work} not found in scan {scan}")]
    WorkNotFound { scan: String, work: String },
    /// Only quarantined works can be restored.
    #[display("work {work} in scan {scan} is not quarantined")]
    NotQuarantined { scan: String, work: String },
    /// Loading or saving the catalog failed; see the inner error.
    #[display("catalog error for scan {_0}")]
    Catalog(#[error(not(source))] String),
    /// Reading or appending the event log failed.
    #[display("quarantine log error")]
    Log,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Catalog(_) | Self::Log)
    }
}
