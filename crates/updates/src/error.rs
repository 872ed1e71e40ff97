//! Update Error Types

use derive_more::{Display, Error};

/// An update-check error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for update checks.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
/// Failures of individual works never show up here: they are counted in the
/// scan's [`UpdateResult`](crate::UpdateResult) and fed to the quarantine.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("scan not found: {_0}")]
    ScanNotFound(#[error(not(source))] String),
    /// The scan names a provider nobody registered.
    #[display("scan {scan} uses unknown provider {provider}")]
    UnknownProvider { scan: String, provider: String },
    /// Loading or saving the catalog failed; nothing from this run was kept.
    #[display("catalog error for scan {_0}")]
    Catalog(#[error(not(source))] String),
    /// Appending to or reading the quarantine log failed.
    #[display("quarantine error for scan {_0}")]
    Quarantine(#[error(not(source))] String),
    /// The persistent half of the update cache or capability store failed.
    #[display("update state store error")]
    Store,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Catalog(_) | Self::Quarantine(_) | Self::Store)
    }
}
