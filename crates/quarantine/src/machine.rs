//! The quarantine state machine.
//!
//! ```text
//! Active --(consecutive errors >= threshold)--> Quarantined
//! Quarantined --(restore / manual_restore)--> Active
//! ```
//!
//! Every transition appends to the event log *before* the catalog is saved.
//! If the save then fails, the log already says what happened and the
//! catalog is brought back in line by [`QuarantineMachine::reconcile_scan()`]
//! the next time the scan is read through the machine.

use crate::error::{ErrorKind, Result};
use crate::stats::{QuarantineStats, latest_actions, replay};
use exn::{OptionExt, ResultExt};
use scanwatch_catalog::error::ErrorKind as CatalogErrorKind;
use scanwatch_catalog::{Catalog, Scan, ScanGuard, Work, WorkStatus};
use scanwatch_db::{QuarantineAction, QuarantineEvent, QuarantineRepository};
use std::sync::Arc;
use time::OffsetDateTime;

pub const DEFAULT_THRESHOLD: u32 = 10;

/// Outcome of one work's check, as reported by the update engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Success,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkSignal {
    pub work_id: String,
    pub signal: Signal,
}
impl WorkSignal {
    pub fn success(work_id: impl Into<String>) -> Self {
        Self { work_id: work_id.into(), signal: Signal::Success }
    }

    pub fn error(work_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self { work_id: work_id.into(), signal: Signal::Error(reason.into()) }
    }
}

/// Result of sweeping every scan with
/// [`check_and_quarantine_all()`](QuarantineMachine::check_and_quarantine_all).
#[derive(Debug, Default)]
pub struct SweepReport {
    pub scans_checked: usize,
    pub quarantined: Vec<QuarantineEvent>,
    /// Scans that couldn't be swept, with the reason.
    pub failed: Vec<(String, String)>,
}

pub struct QuarantineMachine {
    catalog: Arc<Catalog>,
    log: QuarantineRepository,
    threshold: u32,
}

impl QuarantineMachine {
    pub fn new(catalog: Arc<Catalog>, log: QuarantineRepository, threshold: u32) -> Self {
        // Zero would quarantine works that never failed.
        Self { catalog, log, threshold: threshold.max(1) }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Apply the engine's per-work signals to a scan the caller has locked
    /// (through `guard`) and will save.
    ///
    /// Success resets a work's consecutive error count; an error increments
    /// it, and an active work reaching the threshold is quarantined (its
    /// event is appended here, before the caller's save). Signals for
    /// unknown or non-active works are ignored. Returns the appended events.
    pub async fn observe(
        &self,
        guard: &ScanGuard<'_>,
        scan: &mut Scan,
        signals: &[WorkSignal],
    ) -> Result<Vec<QuarantineEvent>> {
        let now = OffsetDateTime::now_utc();
        let name = guard.key();
        let mut events = Vec::new();
        for WorkSignal { work_id, signal } in signals {
            let Some(work) = scan.work_mut(work_id) else {
                tracing::warn!(scan = %name, work = %work_id, "signal for unknown work");
                continue;
            };
            if !work.is_active() {
                continue;
            }
            match signal {
                Signal::Success => work.record_success(now),
                Signal::Error(reason) => {
                    let count = work.record_error(reason.as_str(), now);
                    tracing::debug!(scan = %name, work = %work_id, count, reason = %reason, "check failed");
                },
            }
        }
        for work in scan.works.iter_mut() {
            if work.is_active() && work.consecutive_error_count >= self.threshold {
                events.push(self.quarantine(name, work, now).await?);
            }
        }
        if !events.is_empty() {
            self.refresh_snapshot().await;
        }
        Ok(events)
    }

    /// Quarantine every active work of a scan at or over the threshold.
    pub async fn check_and_quarantine(&self, scan_name: &str) -> Result<Vec<QuarantineEvent>> {
        let guard = self.lock(scan_name).await?;
        let mut scan = self.load(&guard).await?;
        let mut dirty = self.reconcile_scan(&guard, &mut scan).await? > 0;
        let now = OffsetDateTime::now_utc();
        let mut events = Vec::new();
        let name = guard.key();
        for work in scan.works.iter_mut() {
            if work.is_active() && work.consecutive_error_count >= self.threshold {
                events.push(self.quarantine(name, work, now).await?);
                dirty = true;
            }
        }
        if dirty {
            guard.save(&scan).await.or_raise(|| ErrorKind::Catalog(scan_name.to_string()))?;
        }
        self.log.record_check(name, now).await.or_raise(|| ErrorKind::Log)?;
        if !events.is_empty() {
            tracing::info!(scan = %name, count = events.len(), "quarantined works");
            self.refresh_snapshot().await;
        }
        Ok(events)
    }

    /// [`check_and_quarantine()`](Self::check_and_quarantine) over every
    /// scan in the catalog. One scan failing doesn't stop the others.
    pub async fn check_and_quarantine_all(&self) -> Result<SweepReport> {
        let names = self.catalog.list_scans().await.or_raise(|| ErrorKind::Catalog("*".to_string()))?;
        let mut report = SweepReport::default();
        for name in names {
            report.scans_checked += 1;
            match self.check_and_quarantine(&name).await {
                Ok(events) => report.quarantined.extend(events),
                Err(e) => {
                    tracing::warn!(scan = %name, error = ?e, "quarantine sweep failed");
                    report.failed.push((name, (*e).to_string()));
                },
            }
        }
        Ok(report)
    }

    /// Bring a quarantined work back to active duty.
    ///
    /// `manual` picks between a `manual_restore` and a `restore` event;
    /// `actor` records who asked, if known.
    pub async fn restore(
        &self,
        scan_name: &str,
        work_id: &str,
        manual: bool,
        actor: Option<String>,
    ) -> Result<QuarantineEvent> {
        let guard = self.lock(scan_name).await?;
        let mut scan = self.load(&guard).await?;
        self.reconcile_scan(&guard, &mut scan).await?;
        let name = guard.key();
        let work = scan.work_mut(work_id).ok_or_raise(|| ErrorKind::WorkNotFound {
            scan: scan_name.to_string(),
            work: work_id.to_string(),
        })?;
        if !work.is_quarantined() {
            exn::bail!(ErrorKind::NotQuarantined { scan: scan_name.to_string(), work: work_id.to_string() });
        }
        let (action, reason) = if manual {
            (QuarantineAction::ManualRestore, "manual restore")
        } else {
            (QuarantineAction::Restore, "automatic restore")
        };
        let event = QuarantineEvent::new(
            name,
            &work.id,
            &work.title,
            action,
            reason,
            work.consecutive_error_count,
            OffsetDateTime::now_utc(),
        )
        .with_actor(actor);
        let event = self.log.append(&event).await.or_raise(|| ErrorKind::Log)?;
        work.status = WorkStatus::Active;
        work.consecutive_error_count = 0;
        work.last_error = None;
        guard.save(&scan).await.or_raise(|| ErrorKind::Catalog(scan_name.to_string()))?;
        tracing::info!(scan = %scan_name, work = %work_id, action = %action, "restored work");
        self.refresh_snapshot().await;
        Ok(event)
    }

    /// Quarantined works of a scan, after reconciling the catalog with the
    /// log (and saving the fix, if one was needed).
    pub async fn get_quarantined(&self, scan_name: &str) -> Result<Vec<Work>> {
        let guard = self.lock(scan_name).await?;
        let mut scan = self.load(&guard).await?;
        if self.reconcile_scan(&guard, &mut scan).await? > 0 {
            guard.save(&scan).await.or_raise(|| ErrorKind::Catalog(scan_name.to_string()))?;
        }
        Ok(scan.quarantined_works().cloned().collect())
    }

    /// Whether the log's latest word on this work is `quarantine`.
    pub async fn is_quarantined(&self, scan_name: &str, work_id: &str) -> Result<bool> {
        let key = self.catalog.resolve(scan_name).await.or_raise(|| ErrorKind::Catalog(scan_name.to_string()))?;
        let events = self.log.events_for_scan(&key).await.or_raise(|| ErrorKind::Log)?;
        let latest = latest_actions(&events);
        Ok(latest.get(&(key.as_str(), work_id)) == Some(&QuarantineAction::Quarantine))
    }

    /// Statistics rebuilt from the whole log.
    pub async fn get_stats(&self) -> Result<QuarantineStats> {
        let events = self.log.events().await.or_raise(|| ErrorKind::Log)?;
        let last_check = self.log.last_check().await.or_raise(|| ErrorKind::Log)?;
        Ok(replay(&events, OffsetDateTime::now_utc().date(), last_check))
    }

    /// The stored statistics snapshot and when it was taken, if there is
    /// one. May lag behind [`get_stats()`](Self::get_stats).
    pub async fn snapshot(&self) -> Result<Option<(QuarantineStats, OffsetDateTime)>> {
        self.log.load_snapshot().await.or_raise(|| ErrorKind::Log)
    }

    /// The `limit` most recent events, newest first.
    pub async fn get_recent_events(&self, limit: usize) -> Result<Vec<QuarantineEvent>> {
        self.log.recent(limit).await.or_raise(|| ErrorKind::Log)
    }

    /// Reconcile a scan's catalog with the log, locking it for the duration.
    /// Returns how many works were corrected.
    pub async fn reconcile(&self, scan_name: &str) -> Result<usize> {
        let guard = self.lock(scan_name).await?;
        let mut scan = self.load(&guard).await?;
        let fixed = self.reconcile_scan(&guard, &mut scan).await?;
        if fixed > 0 {
            guard.save(&scan).await.or_raise(|| ErrorKind::Catalog(scan_name.to_string()))?;
        }
        Ok(fixed)
    }

    /// Make every work's status agree with the log, on a scan the caller has
    /// locked (through `guard`) and will save. Returns how many works
    /// changed.
    ///
    /// - Log says quarantined, catalog says otherwise: quarantine it (a save
    ///   after a `quarantine` append was lost).
    /// - Log says restored, catalog says quarantined: restore it and reset
    ///   its error count (a save after a restore was lost).
    /// - Catalog says quarantined, log has never heard of the work: the log
    ///   adopts it with a `quarantine` event, so history starts somewhere.
    pub async fn reconcile_scan(&self, guard: &ScanGuard<'_>, scan: &mut Scan) -> Result<usize> {
        let name = guard.key();
        let events = self.log.events_for_scan(name).await.or_raise(|| ErrorKind::Log)?;
        let latest = latest_actions(&events);
        let now = OffsetDateTime::now_utc();
        let mut fixed = 0;
        for work in scan.works.iter_mut() {
            match (latest.get(&(name, work.id.as_str())), work.status) {
                (Some(QuarantineAction::Quarantine), status) if status != WorkStatus::Quarantined => {
                    work.status = WorkStatus::Quarantined;
                },
                (Some(action), WorkStatus::Quarantined) if action.is_restore() => {
                    work.status = WorkStatus::Active;
                    work.consecutive_error_count = 0;
                    work.last_error = None;
                },
                (None, WorkStatus::Quarantined) => {
                    let event = QuarantineEvent::new(
                        name,
                        &work.id,
                        &work.title,
                        QuarantineAction::Quarantine,
                        "quarantined in catalog without log history",
                        work.consecutive_error_count,
                        now,
                    );
                    self.log.append(&event).await.or_raise(|| ErrorKind::Log)?;
                },
                _ => continue,
            }
            tracing::warn!(scan = %name, work = %work.id, status = %work.status, "reconciled work with quarantine log");
            fixed += 1;
        }
        Ok(fixed)
    }

    async fn quarantine(&self, scan_name: &str, work: &mut Work, now: OffsetDateTime) -> Result<QuarantineEvent> {
        let reason = match &work.last_error {
            Some(error) => format!("{} consecutive errors; last: {error}", work.consecutive_error_count),
            None => format!("{} consecutive errors", work.consecutive_error_count),
        };
        let event = QuarantineEvent::new(
            scan_name,
            &work.id,
            &work.title,
            QuarantineAction::Quarantine,
            reason,
            work.consecutive_error_count,
            now,
        );
        let event = self.log.append(&event).await.or_raise(|| ErrorKind::Log)?;
        work.status = WorkStatus::Quarantined;
        tracing::info!(scan = %scan_name, work = %work.id, errors = work.consecutive_error_count, "work quarantined");
        Ok(event)
    }

    async fn lock(&self, scan_name: &str) -> Result<ScanGuard<'_>> {
        self.catalog.lock(scan_name).await.or_raise(|| ErrorKind::Catalog(scan_name.to_string()))
    }

    async fn load(&self, guard: &ScanGuard<'_>) -> Result<Scan> {
        match guard.load().await {
            Ok(scan) => Ok(scan),
            Err(e) if matches!(&*e, CatalogErrorKind::NotFound(_)) => {
                Err(e.raise(ErrorKind::ScanNotFound(guard.name().to_string())))
            },
            Err(e) => Err(e.raise(ErrorKind::Catalog(guard.name().to_string()))),
        }
    }

    /// The snapshot is a cache of [`get_stats()`](Self::get_stats); failing
    /// to refresh it is not worth failing a transition over.
    async fn refresh_snapshot(&self) {
        let stats = match self.get_stats().await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::warn!(error = ?e, "could not rebuild quarantine stats");
                return;
            },
        };
        if let Err(e) = self.log.save_snapshot(&stats, OffsetDateTime::now_utc()).await {
            tracing::warn!(error = ?e, "could not store quarantine stats snapshot");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use scanwatch_db::Database;
    use scanwatch_storage::backend::{MockBackend, StorageBackend};
    use std::path::Path;

    struct Fixture {
        backend: Arc<MockBackend>,
        catalog: Arc<Catalog>,
        machine: QuarantineMachine,
    }

    async fn fixture(works: Vec<Work>) -> Fixture {
        let backend = Arc::new(MockBackend::default());
        let catalog = Arc::new(Catalog::new(backend.clone()));
        catalog.save("alpha", &Scan::new("alpha", "mangadex").with_works(works)).await.unwrap();
        let db = Database::connect_in_memory().await.unwrap();
        let machine = QuarantineMachine::new(catalog.clone(), QuarantineRepository::from(&db), DEFAULT_THRESHOLD);
        Fixture { backend, catalog, machine }
    }

    fn work(id: &str, errors: u32) -> Work {
        Work::new(id, format!("Work {id}"), format!("/manga/{id}")).with_error_count(errors)
    }

    #[tokio::test]
    async fn test_ninth_to_tenth_error_quarantines_once() {
        let f = fixture(vec![work("a", 9), work("b", 0)]).await;
        let guard = f.catalog.lock("alpha").await.unwrap();
        let mut scan = guard.load().await.unwrap();
        let events = f
            .machine
            .observe(&guard, &mut scan, &[WorkSignal::error("a", "timeout"), WorkSignal::error("b", "timeout")])
            .await
            .unwrap();
        guard.save(&scan).await.unwrap();
        drop(guard);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].work_id, "a");
        assert_eq!(events[0].action, QuarantineAction::Quarantine);
        assert_eq!(events[0].error_count, 10);
        let scan = f.catalog.load("alpha").await.unwrap();
        assert_eq!(scan.work("a").unwrap().status, WorkStatus::Quarantined);
        assert_eq!(scan.work("b").unwrap().consecutive_error_count, 1);
        assert!(f.machine.is_quarantined("alpha", "a").await.unwrap());
        assert!(!f.machine.is_quarantined("alpha", "b").await.unwrap());
        assert_eq!(f.machine.get_recent_events(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_success_resets_count() {
        let f = fixture(vec![work("a", 9)]).await;
        let guard = f.catalog.lock("alpha").await.unwrap();
        let mut scan = guard.load().await.unwrap();
        let events = f.machine.observe(&guard, &mut scan, &[WorkSignal::success("a")]).await.unwrap();
        assert!(events.is_empty());
        assert_eq!(scan.work("a").unwrap().consecutive_error_count, 0);
    }

    #[tokio::test]
    async fn test_signals_for_quarantined_works_are_ignored() {
        let f = fixture(vec![work("a", 10).with_status(WorkStatus::Quarantined)]).await;
        f.machine.reconcile("alpha").await.unwrap();
        let guard = f.catalog.lock("alpha").await.unwrap();
        let mut scan = guard.load().await.unwrap();
        let events = f.machine.observe(&guard, &mut scan, &[WorkSignal::error("a", "timeout")]).await.unwrap();
        assert!(events.is_empty());
        assert_eq!(scan.work("a").unwrap().consecutive_error_count, 10);
    }

    #[tokio::test]
    async fn test_check_and_quarantine() {
        let f = fixture(vec![work("a", 12), work("b", 10), work("c", 3)]).await;
        let events = f.machine.check_and_quarantine("alpha").await.unwrap();
        let ids: Vec<_> = events.iter().map(|e| e.work_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        // Nothing left to do the second time round.
        assert!(f.machine.check_and_quarantine("alpha").await.unwrap().is_empty());
        let quarantined: Vec<_> = f.machine.get_quarantined("alpha").await.unwrap().into_iter().map(|w| w.id).collect();
        assert_eq!(quarantined, vec!["a".to_string(), "b".to_string()]);

        let stats = f.machine.get_stats().await.unwrap();
        assert_eq!(stats.total_quarantined, 2);
        assert_eq!(stats.by_scan.get("alpha"), Some(&2));
        assert_eq!(stats.auto_quarantines_today, 2);
        assert!(stats.last_check.is_some());
        let (snapshot, _) = f.machine.snapshot().await.unwrap().unwrap();
        assert_eq!(snapshot.total_quarantined, 2);
    }

    #[tokio::test]
    async fn test_restore_resets_count_and_requires_fresh_errors() {
        let f = fixture(vec![work("a", 10)]).await;
        f.machine.check_and_quarantine("alpha").await.unwrap();
        let event = f.machine.restore("alpha", "a", true, Some("admin".to_string())).await.unwrap();
        assert_eq!(event.action, QuarantineAction::ManualRestore);
        assert_eq!(event.actor.as_deref(), Some("admin"));
        assert_eq!(event.error_count, 10);

        let scan = f.catalog.load("alpha").await.unwrap();
        let restored = scan.work("a").unwrap();
        assert!(restored.is_active());
        assert_eq!(restored.consecutive_error_count, 0);
        assert!(!f.machine.is_quarantined("alpha", "a").await.unwrap());
        assert_eq!(f.machine.get_stats().await.unwrap().manual_restores_today, 1);

        // Nine more failures are not enough; the tenth is.
        let guard = f.catalog.lock("alpha").await.unwrap();
        let mut scan = guard.load().await.unwrap();
        for _ in 0..9 {
            assert!(f.machine.observe(&guard, &mut scan, &[WorkSignal::error("a", "503")]).await.unwrap().is_empty());
        }
        assert_eq!(f.machine.observe(&guard, &mut scan, &[WorkSignal::error("a", "503")]).await.unwrap().len(), 1);
    }

    #[rstest]
    #[case(true, QuarantineAction::ManualRestore)]
    #[case(false, QuarantineAction::Restore)]
    #[tokio::test]
    async fn test_restore_action(#[case] manual: bool, #[case] expected: QuarantineAction) {
        let f = fixture(vec![work("a", 10)]).await;
        f.machine.check_and_quarantine("alpha").await.unwrap();
        assert_eq!(f.machine.restore("alpha", "a", manual, None).await.unwrap().action, expected);
        let latest = f.machine.get_recent_events(1).await.unwrap();
        assert_eq!(latest[0].action, expected);
    }

    #[tokio::test]
    async fn test_zero_threshold_is_one() {
        let catalog = Arc::new(Catalog::new(Arc::new(MockBackend::default())));
        let db = Database::connect_in_memory().await.unwrap();
        assert_eq!(QuarantineMachine::new(catalog, QuarantineRepository::from(&db), 0).threshold(), 1);
    }

    #[tokio::test]
    async fn test_restore_errors() {
        let f = fixture(vec![work("a", 0)]).await;
        let err = f.machine.restore("alpha", "a", true, None).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotQuarantined { .. }));
        let err = f.machine.restore("alpha", "zzz", true, None).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::WorkNotFound { .. }));
        let err = f.machine.restore("nope", "a", true, None).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::ScanNotFound(_)));
    }

    #[tokio::test]
    async fn test_lost_save_is_reconciled_from_log() {
        let f = fixture(vec![work("a", 10)]).await;
        f.backend.fail_writes(true);
        let err = f.machine.check_and_quarantine("alpha").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Catalog(_)));
        // The log has the event, the catalog doesn't.
        assert!(f.machine.is_quarantined("alpha", "a").await.unwrap());
        assert!(f.catalog.load("alpha").await.unwrap().work("a").unwrap().is_active());

        f.backend.fail_writes(false);
        let quarantined = f.machine.get_quarantined("alpha").await.unwrap();
        assert_eq!(quarantined.len(), 1);
        assert!(f.catalog.load("alpha").await.unwrap().work("a").unwrap().is_quarantined());
        // Reconciling must not have appended a second event.
        assert_eq!(f.machine.get_recent_events(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_lost_restore_save_is_reconciled() {
        let f = fixture(vec![work("a", 10)]).await;
        f.machine.check_and_quarantine("alpha").await.unwrap();
        f.backend.fail_writes(true);
        assert!(f.machine.restore("alpha", "a", false, None).await.is_err());
        f.backend.fail_writes(false);
        assert_eq!(f.machine.reconcile("alpha").await.unwrap(), 1);
        let scan = f.catalog.load("alpha").await.unwrap();
        assert!(scan.work("a").unwrap().is_active());
        assert_eq!(scan.work("a").unwrap().consecutive_error_count, 0);
    }

    #[tokio::test]
    async fn test_catalog_quarantine_without_history_is_adopted() {
        let f = fixture(vec![work("a", 4).with_status(WorkStatus::Quarantined)]).await;
        assert!(!f.machine.is_quarantined("alpha", "a").await.unwrap());
        assert_eq!(f.machine.get_quarantined("alpha").await.unwrap().len(), 1);
        assert!(f.machine.is_quarantined("alpha", "a").await.unwrap());
    }

    #[tokio::test]
    async fn test_scan_name_spellings_agree() {
        let backend = Arc::new(MockBackend::default());
        let catalog = Arc::new(Catalog::new(backend));
        catalog.save("Beta", &Scan::new("Beta", "asura").with_works([work("1", 10)])).await.unwrap();
        let db = Database::connect_in_memory().await.unwrap();
        let machine = QuarantineMachine::new(catalog.clone(), QuarantineRepository::from(&db), DEFAULT_THRESHOLD);

        let events = machine.check_and_quarantine("beta").await.unwrap();
        assert_eq!(events[0].scan_name, "beta");
        for name in ["beta", "Beta", "BETA"] {
            assert_eq!(machine.get_quarantined(name).await.unwrap().len(), 1);
            assert!(machine.is_quarantined(name, "1").await.unwrap());
        }
        let stats = machine.get_stats().await.unwrap();
        assert_eq!(stats.by_scan.get("beta"), Some(&1));

        machine.restore("Beta", "1", true, None).await.unwrap();
        assert!(!machine.is_quarantined("beta", "1").await.unwrap());
        // Nothing filed under a second spelling for reconcile to trip over.
        assert_eq!(machine.reconcile("BETA").await.unwrap(), 0);
        assert!(machine.get_quarantined("beta").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_isolates_failures() {
        let f = fixture(vec![work("a", 10)]).await;
        // A document that won't decode sits next to a healthy scan.
        f.backend.write(Path::new("broken.json"), b"{").await.unwrap();
        let report = f.machine.check_and_quarantine_all().await.unwrap();
        assert_eq!(report.scans_checked, 2);
        assert_eq!(report.quarantined.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "broken");
    }
}
