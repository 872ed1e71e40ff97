//! Scan catalogs.
//!
//! A catalog is the list of works a scan tracks, with the chapters already
//! known for each one and the bookkeeping the update engine and quarantine
//! need (status, consecutive error count, last check). Each scan is stored as
//! a single JSON document, replaced atomically on every save.
//!
//! Concurrent writers to the same scan are serialized by a per-scan lock
//! ([`Catalog::lock`]); writers to different scans never block each other.

pub mod error;
mod models;
mod store;

pub use crate::models::{Chapter, Fingerprint, Scan, ScanSummary, Work, WorkStatus};
pub use crate::store::{Catalog, ScanGuard, document_name};
