//! SQLite persistence.
//!
//! Three kinds of state live here:
//! - the **update cache**: a fingerprint per work, disposable (dropping it
//!   only costs re-fetches);
//! - **provider capability records**: whether each provider supports bulk
//!   updates, so detection isn't repeated every run;
//! - the **quarantine event log**: append-only and authoritative. Quarantine
//!   status in the catalog and all quarantine statistics are projections of
//!   it.

mod db;
pub mod error;
mod models;
mod repo;

pub use crate::db::Database;
pub use crate::models::{CacheEntry, CapabilityRecord, QuarantineAction, QuarantineEvent, Support};
pub use crate::repo::{CacheRepository, CapabilityRepository, QuarantineRepository};
