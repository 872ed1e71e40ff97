//! Quarantine for chronically failing works.
//!
//! Works whose checks keep failing are pulled out of active processing once
//! their consecutive error count reaches a threshold, and stay out until
//! restored. The append-only event log in `scanwatch-db` is the source of
//! truth: catalog statuses and [`QuarantineStats`] are both projections of
//! it.

pub mod error;
mod machine;
mod stats;

pub use crate::machine::{DEFAULT_THRESHOLD, QuarantineMachine, Signal, SweepReport, WorkSignal};
pub use crate::stats::{QuarantineStats, replay};
