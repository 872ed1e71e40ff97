//! Keeps track of which works in a set of scan catalogs have new chapters.
//!
//! [`Tracker`] wires the pieces together: the catalog store, the SQLite
//! state, the provider capability registry, the update cache, the update
//! engine and batch coordinator, and the quarantine.

pub mod error;

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use scanwatch_catalog::{Catalog, Scan, Work};
use scanwatch_config::Config;
use scanwatch_db::{
    CacheRepository, CapabilityRecord, CapabilityRepository, Database, QuarantineEvent, QuarantineRepository,
};
use scanwatch_quarantine::{QuarantineMachine, QuarantineStats, SweepReport};
use scanwatch_storage::BackendHandle;
use scanwatch_storage::backend::LocalBackend;
use scanwatch_updates::{
    BatchCoordinator, BatchResult, CacheStats, CapabilityRegistry, EngineSettings, Providers, RetryPolicy,
    UpdateCache, UpdateEngine, UpdateResult,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use time::OffsetDateTime;

pub use scanwatch_config as config;

/// Engine settings as configured.
pub fn engine_settings(config: &Config) -> EngineSettings {
    let updates = &config.updates;
    EngineSettings {
        request_delay: updates.request_delay(),
        retry: RetryPolicy::new(updates.retry_attempts, updates.retry_delay()),
        empty_chapters: updates.empty_chapters,
    }
}

pub struct Tracker {
    config: Config,
    db: Database,
    catalog: Arc<Catalog>,
    quarantine: Arc<QuarantineMachine>,
    batch: BatchCoordinator,
}

impl Tracker {
    /// Open the catalog directory and database named by the configuration.
    pub async fn open(config: Config, providers: Providers) -> Result<Self> {
        let catalog_dir = std::path::absolute(config.catalog_dir()).or_raise(|| ErrorKind::Storage)?;
        let backend = LocalBackend::new("catalog", &catalog_dir).or_raise(|| ErrorKind::Storage)?;
        let db = Database::connect(config.database_path()).await.or_raise(|| ErrorKind::Database)?;
        tracing::debug!(catalog = %catalog_dir.display(), database = %config.database_path().display(), "opened tracker");
        Self::with_parts(config, Arc::new(backend), db, providers).await
    }

    /// Assemble a tracker over an existing backend and database.
    pub async fn with_parts(config: Config, backend: BackendHandle, db: Database, providers: Providers) -> Result<Self> {
        let catalog = Arc::new(Catalog::new(backend));
        let registry = CapabilityRegistry::load(CapabilityRepository::from(&db)).await.or_raise(|| ErrorKind::Database)?;
        let cache = UpdateCache::load(CacheRepository::from(&db), config.updates.cache_ttl())
            .await
            .or_raise(|| ErrorKind::Database)?;
        let quarantine = Arc::new(QuarantineMachine::new(
            catalog.clone(),
            QuarantineRepository::from(&db),
            config.quarantine.threshold,
        ));
        let engine = UpdateEngine::new(
            catalog.clone(),
            providers,
            Arc::new(registry),
            Arc::new(cache),
            quarantine.clone(),
            engine_settings(&config),
        );
        let batch = BatchCoordinator::new(Arc::new(engine));
        Ok(Self { config, db, catalog, quarantine, batch })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub async fn list_scans(&self) -> Result<BTreeSet<String>> {
        self.catalog.list_scans().await.or_raise(|| ErrorKind::Catalog)
    }

    pub async fn load_scan(&self, scan_name: &str) -> Result<Scan> {
        self.catalog.load(scan_name).await.or_raise(|| ErrorKind::Catalog)
    }

    pub async fn check_scan_updates(&self, scan_name: &str) -> Result<UpdateResult> {
        self.batch.engine().check_scan(scan_name).await.or_raise(|| ErrorKind::Update)
    }

    /// Check several scans with the configured concurrency and deadline.
    pub async fn check_many<I, S>(&self, scan_names: I) -> BatchResult
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let updates = &self.config.updates;
        self.batch.check_many(scan_names, updates.max_concurrency, updates.deadline()).await
    }

    /// Check every scan in the catalog.
    pub async fn check_all(&self) -> Result<BatchResult> {
        let updates = &self.config.updates;
        self.batch.check_all(updates.max_concurrency, updates.deadline()).await.or_raise(|| ErrorKind::Update)
    }

    pub async fn list_quarantined(&self, scan_name: &str) -> Result<Vec<Work>> {
        self.quarantine.get_quarantined(scan_name).await.or_raise(|| ErrorKind::Quarantine)
    }

    pub async fn restore_work(&self, scan_name: &str, work_id: &str, manual: bool) -> Result<QuarantineEvent> {
        self.restore_work_as(scan_name, work_id, manual, None).await
    }

    /// [`restore_work()`](Self::restore_work), recording who asked for it.
    pub async fn restore_work_as(
        &self,
        scan_name: &str,
        work_id: &str,
        manual: bool,
        actor: Option<String>,
    ) -> Result<QuarantineEvent> {
        self.quarantine.restore(scan_name, work_id, manual, actor).await.or_raise(|| ErrorKind::Quarantine)
    }

    /// Whether the quarantine log currently holds a work in quarantine.
    pub async fn is_quarantined(&self, scan_name: &str, work_id: &str) -> Result<bool> {
        self.quarantine.is_quarantined(scan_name, work_id).await.or_raise(|| ErrorKind::Quarantine)
    }

    pub async fn get_stats(&self) -> Result<QuarantineStats> {
        self.quarantine.get_stats().await.or_raise(|| ErrorKind::Quarantine)
    }

    pub async fn get_recent_events(&self, limit: usize) -> Result<Vec<QuarantineEvent>> {
        self.quarantine.get_recent_events(limit).await.or_raise(|| ErrorKind::Quarantine)
    }

    /// Quarantine every work over the threshold, across all scans.
    pub async fn sweep(&self) -> Result<SweepReport> {
        self.quarantine.check_and_quarantine_all().await.or_raise(|| ErrorKind::Quarantine)
    }

    pub async fn redetect_capability(&self, provider: &str) -> Result<()> {
        self.batch.engine().registry().redetect(provider).await.or_raise(|| ErrorKind::Database)
    }

    pub async fn capabilities(&self) -> Vec<CapabilityRecord> {
        self.batch.engine().registry().records().await
    }

    /// Drop expired update cache entries, returning how many went.
    pub async fn purge_cache(&self) -> Result<usize> {
        let cache = self.batch.engine().cache();
        cache.purge_expired(OffsetDateTime::now_utc()).await.or_raise(|| ErrorKind::Database)
    }

    pub async fn clear_cache(&self) -> Result<usize> {
        self.batch.engine().cache().clear().await.or_raise(|| ErrorKind::Database)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.batch.engine().cache().stats(OffsetDateTime::now_utc())
    }

    pub async fn close(self) {
        self.db.close().await;
    }
}
