//! Update detection.
//!
//! The [`UpdateEngine`] checks one scan's works for new chapters, preferring
//! a single bulk call when the provider supports one (as remembered by the
//! [`CapabilityRegistry`]) and falling back to paced per-work fetches, with
//! the [`UpdateCache`] sparing works that haven't changed. Every check's
//! outcome feeds the quarantine. The [`BatchCoordinator`] runs the engine
//! over many scans concurrently.

mod batch;
mod cache;
mod engine;
pub mod error;
mod provider;
mod registry;
mod result;
mod retry;
#[cfg(any(test, feature = "mock"))]
mod scripted;

pub use crate::batch::{BatchCoordinator, DEFAULT_CONCURRENCY};
pub use crate::cache::{CacheStats, DEFAULT_TTL, UpdateCache};
pub use crate::engine::{EmptyChapterPolicy, EngineSettings, UpdateEngine};
pub use crate::provider::{
    BulkChange, BulkUpdate, ChapterListing, Provider, ProviderError, ProviderErrorKind, ProviderResult, Providers,
};
pub use crate::registry::{BulkOutcome, CapabilityRegistry};
pub use crate::result::{BatchResult, Outcome, UpdateMethod, UpdateResult, WorkUpdate};
pub use crate::retry::RetryPolicy;
#[cfg(any(test, feature = "mock"))]
pub use crate::scripted::ScriptedProvider;
