//! Checking one scan for new chapters.
//!
//! The whole check runs under the scan's catalog lock:
//!
//! 1. bring the catalog in line with the quarantine log;
//! 2. ask the provider for a bulk update (at most once per run, and never
//!    once the registry knows it can't);
//! 3. otherwise fetch each active work in turn, skipping works whose cached
//!    fingerprint still matches, pausing between fetches;
//! 4. merge what came back, turn every outcome into a quarantine signal;
//! 5. save the scan, then record the new fingerprints.

use crate::cache::UpdateCache;
use crate::error::{ErrorKind, Result};
use crate::provider::{BulkChange, ChapterListing, Provider, Providers};
use crate::registry::{BulkOutcome, CapabilityRegistry};
use crate::result::{UpdateMethod, UpdateResult, WorkUpdate};
use crate::retry::RetryPolicy;
use exn::{OptionExt, ResultExt};
use scanwatch_catalog::error::ErrorKind as CatalogErrorKind;
use scanwatch_catalog::{Catalog, Scan, ScanGuard};
use scanwatch_quarantine::{QuarantineMachine, WorkSignal};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tracing::instrument;

pub use scanwatch_config::EmptyChapterPolicy;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Pause between two per-work fetches.
    pub request_delay: Duration,
    pub retry: RetryPolicy,
    pub empty_chapters: EmptyChapterPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            request_delay: Duration::from_secs(1),
            retry: RetryPolicy::default(),
            empty_chapters: EmptyChapterPolicy::default(),
        }
    }
}

/// How one work's check went, before it's applied to the catalog.
enum Check {
    Fetched(ChapterListing),
    /// Reported unchanged by a bulk update.
    Unchanged,
    Failed(String),
}

pub struct UpdateEngine {
    catalog: Arc<Catalog>,
    providers: Providers,
    registry: Arc<CapabilityRegistry>,
    cache: Arc<UpdateCache>,
    quarantine: Arc<QuarantineMachine>,
    settings: EngineSettings,
}

impl UpdateEngine {
    pub fn new(
        catalog: Arc<Catalog>,
        providers: Providers,
        registry: Arc<CapabilityRegistry>,
        cache: Arc<UpdateCache>,
        quarantine: Arc<QuarantineMachine>,
        settings: EngineSettings,
    ) -> Self {
        Self { catalog, providers, registry, cache, quarantine, settings }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<UpdateCache> {
        &self.cache
    }

    pub fn quarantine(&self) -> &Arc<QuarantineMachine> {
        &self.quarantine
    }

    /// Check every active work of a scan for new chapters, and save what was
    /// found.
    ///
    /// Per-work failures are counted in the result and fed to the
    /// quarantine; only failures that stop the scan as a whole (the scan or
    /// its provider can't be found, the catalog or quarantine log can't be
    /// read or written) are returned as errors, in which case nothing was
    /// saved.
    #[instrument(skip(self), fields(provider = tracing::field::Empty))]
    pub async fn check_scan(&self, scan_name: &str) -> Result<UpdateResult> {
        let started = Instant::now();
        let guard = self.catalog.lock(scan_name).await.or_raise(|| ErrorKind::Catalog(scan_name.to_string()))?;
        let mut scan = load(&guard).await?;
        let key = guard.key().to_string();
        self.quarantine
            .reconcile_scan(&guard, &mut scan)
            .await
            .or_raise(|| ErrorKind::Quarantine(scan_name.to_string()))?;
        tracing::Span::current().record("provider", scan.provider.as_str());
        let provider = self.providers.get(&scan.provider).ok_or_raise(|| ErrorKind::UnknownProvider {
            scan: scan_name.to_string(),
            provider: scan.provider.clone(),
        })?;

        let (mut result, checks) = match self.registry.bulk(provider.as_ref()).await {
            BulkOutcome::Changes(changes) => optimized(&key, &scan, changes),
            BulkOutcome::Unsupported | BulkOutcome::Failed(_) => self.fallback(&key, &scan, provider.as_ref()).await,
        };
        result.skipped = scan.works.iter().filter(|w| !w.is_active()).count();

        let now = OffsetDateTime::now_utc();
        let mut signals = Vec::with_capacity(checks.len());
        let mut fingerprints = Vec::new();
        for (work_id, check) in checks {
            let Some(work) = scan.work_mut(&work_id) else {
                continue;
            };
            let listing = match check {
                Check::Fetched(listing) => listing,
                Check::Unchanged => {
                    signals.push(WorkSignal::success(work_id));
                    continue;
                },
                Check::Failed(reason) => {
                    result.errors += 1;
                    signals.push(WorkSignal::error(work_id, reason));
                    continue;
                },
            };
            if let Err(reason) = self.validate(&listing) {
                tracing::debug!(work = %work_id, reason = %reason, "invalid chapter listing");
                result.errors += 1;
                signals.push(WorkSignal::error(work_id, reason));
                continue;
            }
            let added = work.merge_chapters(&listing.chapters);
            if listing.total.is_some() {
                work.total_chapters = listing.total;
            }
            if !added.is_empty() {
                tracing::info!(work = %work_id, title = %work.title, new_chapters = added.len(), "new chapters");
                result.updates.push(WorkUpdate {
                    work_id: work.id.clone(),
                    title: work.title.clone(),
                    locator: work.locator.clone(),
                    new_chapters: added,
                });
            }
            fingerprints.push((work_id.clone(), work.fingerprint()));
            signals.push(WorkSignal::success(work_id));
        }

        self.quarantine
            .observe(&guard, &mut scan, &signals)
            .await
            .or_raise(|| ErrorKind::Quarantine(scan_name.to_string()))?;
        scan.last_check = Some(now);
        guard.save(&scan).await.or_raise(|| ErrorKind::Catalog(scan_name.to_string()))?;
        drop(guard);

        // Only fingerprints of what was actually saved are worth caching.
        for (work_id, fingerprint) in &fingerprints {
            self.cache.put(&key, work_id, fingerprint, now).await;
        }

        result.duration = started.elapsed();
        result.timestamp = now;
        tracing::info!(
            method = %result.method,
            checked = result.works_checked,
            updates = result.updates.len(),
            errors = result.errors,
            requests = result.requests_issued,
            cache_hits = result.cache_hits,
            "scan checked",
        );
        Ok(result)
    }

    /// One fetch per active work, in catalog order, skipping works whose
    /// cached fingerprint still matches the catalog.
    async fn fallback(&self, key: &str, scan: &Scan, provider: &dyn Provider) -> (UpdateResult, Vec<(String, Check)>) {
        let mut result = UpdateResult::new(key, UpdateMethod::Fallback);
        let mut checks = Vec::new();
        let now = OffsetDateTime::now_utc();
        for work in scan.active_works() {
            let cached = self.cache.fresh(key, &work.id, now);
            if cached.is_some_and(|entry| entry.fingerprint == work.fingerprint().as_str()) {
                result.cache_hits += 1;
                continue;
            }
            result.cache_misses += 1;
            if result.requests_issued > 0 && !self.settings.request_delay.is_zero() {
                tokio::time::sleep(self.settings.request_delay).await;
            }
            let (fetched, attempts) = self.settings.retry.run(|| provider.fetch_chapters(&work.locator)).await;
            result.requests_issued += attempts as usize;
            result.works_checked += 1;
            let check = match fetched {
                Ok(listing) => Check::Fetched(listing),
                Err(e) => {
                    tracing::warn!(work = %work.id, attempts, error = ?e, "chapter fetch failed");
                    Check::Failed((*e).to_string())
                },
            };
            checks.push((work.id.clone(), check));
        }
        (result, checks)
    }

    fn validate(&self, listing: &ChapterListing) -> std::result::Result<(), String> {
        if listing.chapters.is_empty() && self.settings.empty_chapters == EmptyChapterPolicy::Anomaly {
            return Err("provider listed no chapters".to_string());
        }
        let mut seen = HashSet::new();
        if let Some(duplicate) = listing.chapters.iter().find(|c| !seen.insert(c.id.as_str())) {
            return Err(format!("provider listed chapter {} twice", duplicate.id));
        }
        Ok(())
    }
}

/// Map a bulk update onto the scan's active works. Works the provider didn't
/// mention are unchanged.
fn optimized(key: &str, scan: &Scan, changes: Vec<BulkChange>) -> (UpdateResult, Vec<(String, Check)>) {
    let mut result = UpdateResult::new(key, UpdateMethod::Optimized);
    result.requests_issued = 1;
    let mut changed: HashMap<String, ChapterListing> = HashMap::new();
    for change in changes {
        let matched = scan.work_by_locator(&change.work_ref).or_else(|| scan.work_by_title(&change.title));
        match matched {
            Some(work) if work.is_active() => {
                changed.entry(work.id.clone()).or_insert(change.listing);
            },
            Some(_) => {},
            None => tracing::debug!(work_ref = %change.work_ref, title = %change.title, "bulk change matches no work"),
        }
    }
    let checks = scan
        .active_works()
        .map(|work| {
            let check = changed.remove(&work.id).map_or(Check::Unchanged, Check::Fetched);
            (work.id.clone(), check)
        })
        .collect::<Vec<_>>();
    result.works_checked = checks.len();
    (result, checks)
}

async fn load(guard: &ScanGuard<'_>) -> Result<Scan> {
    match guard.load().await {
        Ok(scan) => Ok(scan),
        Err(e) if matches!(&*e, CatalogErrorKind::NotFound(_)) => {
            Err(e.raise(ErrorKind::ScanNotFound(guard.name().to_string())))
        },
        Err(e) => Err(e.raise(ErrorKind::Catalog(guard.name().to_string()))),
    }
}
