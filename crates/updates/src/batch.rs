//! Checking many scans at once.

use crate::engine::UpdateEngine;
use crate::error::{ErrorKind, Result};
use crate::result::{BatchResult, UpdateResult};
use exn::ResultExt;
use futures::FutureExt;
use std::any::Any;
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tokio::task::JoinSet;
use tracing::{Instrument, instrument};

pub const DEFAULT_CONCURRENCY: usize = 5;

/// Runs the [`UpdateEngine`] over several scans with bounded concurrency.
///
/// Each scan is its own task: an error or a panic in one scan ends up as
/// that scan's `Failed` result and never disturbs the others.
pub struct BatchCoordinator {
    engine: Arc<UpdateEngine>,
}

impl BatchCoordinator {
    pub fn new(engine: Arc<UpdateEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<UpdateEngine> {
        &self.engine
    }

    /// Check the named scans, at most `max_concurrency` at a time.
    ///
    /// Scans still running or not yet started when `deadline` passes are
    /// reported `TimedOut`. Running checks are left to finish in the
    /// background rather than cancelled, so a scan is never abandoned half
    /// way through a save. Results follow the order of `scan_names`, each
    /// scan once.
    #[instrument(skip_all, fields(concurrency = max_concurrency.max(1)))]
    pub async fn check_many<I, S>(&self, scan_names: I, max_concurrency: usize, deadline: Option<Duration>) -> BatchResult
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let started_at = OffsetDateTime::now_utc();
        let started = Instant::now();
        let deadline = deadline.map(|d| tokio::time::Instant::now() + d);

        let mut seen = HashSet::new();
        let names: Vec<String> = scan_names.into_iter().map(Into::into).filter(|n| seen.insert(n.clone())).collect();
        tracing::info!(scans = names.len(), "starting batch");

        let mut queue: VecDeque<String> = names.iter().cloned().collect();
        let mut set = JoinSet::new();
        for name in queue.drain(..max_concurrency.max(1).min(names.len())) {
            self.spawn(&mut set, name);
        }

        let mut results: HashMap<String, UpdateResult> = HashMap::with_capacity(names.len());
        let mut timed_out = false;
        loop {
            let joined = match deadline {
                Some(at) => match tokio::time::timeout_at(at, set.join_next()).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        timed_out = true;
                        break;
                    },
                },
                None => set.join_next().await,
            };
            let Some(joined) = joined else {
                break;
            };
            match joined {
                Ok((name, result)) => {
                    results.insert(name, result);
                },
                Err(e) => tracing::error!(error = %e, "scan check task vanished"),
            }
            // Pop-n-push, FIFO.
            if let Some(name) = queue.pop_front() {
                self.spawn(&mut set, name);
            }
        }
        if timed_out {
            tracing::warn!(running = set.len(), queued = queue.len(), "batch deadline passed");
            set.detach_all();
        }

        let results = names
            .into_iter()
            .map(|name| match results.remove(&name) {
                Some(result) => result,
                None if timed_out => UpdateResult::timed_out(name),
                None => UpdateResult::failed(name, "check did not report back"),
            })
            .collect();
        let batch = BatchResult {
            results,
            started_at,
            finished_at: OffsetDateTime::now_utc(),
            duration: started.elapsed(),
        };
        tracing::info!(
            scans = batch.total_scans(),
            successful = batch.successful_scans(),
            updates = batch.works_with_updates(),
            new_chapters = batch.new_chapters(),
            "batch finished",
        );
        batch
    }

    /// [`check_many()`](Self::check_many) over every scan in the catalog.
    pub async fn check_all(&self, max_concurrency: usize, deadline: Option<Duration>) -> Result<BatchResult> {
        let names = self.engine.catalog().list_scans().await.or_raise(|| ErrorKind::Catalog("*".to_string()))?;
        Ok(self.check_many(names, max_concurrency, deadline).await)
    }

    fn spawn(&self, set: &mut JoinSet<(String, UpdateResult)>, name: String) {
        let engine = self.engine.clone();
        let task = async move {
            let result = match AssertUnwindSafe(engine.check_scan(&name)).catch_unwind().await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => {
                    tracing::warn!(scan = %name, error = ?e, "scan check failed");
                    UpdateResult::failed(&name, (*e).to_string())
                },
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    tracing::error!(scan = %name, panic = %message, "scan check panicked");
                    UpdateResult::failed(&name, format!("check panicked: {message}"))
                },
            };
            (name, result)
        };
        set.spawn(task.in_current_span());
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
