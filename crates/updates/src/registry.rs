//! Which providers can answer a bulk update, remembered across runs.
//!
//! Detection costs one bulk call. A provider that answers it is recorded as
//! `Supported`; one that has no bulk capability at all, or explicitly refuses
//! the call, is recorded as `Unsupported` and never asked again until
//! [`redetect()`](CapabilityRegistry::redetect). Transient failures change
//! nothing.

use crate::error::{ErrorKind, Result};
use crate::provider::{BulkChange, Provider, ProviderError, ProviderErrorKind};
use dashmap::DashMap;
use exn::ResultExt;
use scanwatch_db::{CapabilityRecord, CapabilityRepository, Support};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::Mutex;

/// What asking a provider for a bulk update came to.
#[derive(Debug)]
pub enum BulkOutcome {
    /// The provider answered; these works changed.
    Changes(Vec<BulkChange>),
    /// The provider can't do bulk updates (known from before, or just found
    /// out). Check works one at a time.
    Unsupported,
    /// The call failed in a way that says nothing about the capability.
    Failed(ProviderError),
}

pub struct CapabilityRegistry {
    records: DashMap<String, Arc<Mutex<CapabilityRecord>>>,
    repo: CapabilityRepository,
}

impl CapabilityRegistry {
    /// Build the registry from every record already in the store.
    pub async fn load(repo: CapabilityRepository) -> Result<Self> {
        let records = DashMap::new();
        for record in repo.list().await.or_raise(|| ErrorKind::Store)? {
            records.insert(record.provider.clone(), Arc::new(Mutex::new(record)));
        }
        tracing::debug!(providers = records.len(), "loaded provider capabilities");
        Ok(Self { records, repo })
    }

    /// Current record for a provider; `Unknown` if it was never seen.
    pub async fn resolve(&self, provider: &str) -> CapabilityRecord {
        let entry = self.entry(provider);
        let record = entry.lock().await;
        record.clone()
    }

    /// Every known record, sorted by provider name.
    pub async fn records(&self) -> Vec<CapabilityRecord> {
        let entries: Vec<_> = self.records.iter().map(|e| e.value().clone()).collect();
        let mut records = Vec::with_capacity(entries.len());
        for entry in entries {
            records.push(entry.lock().await.clone());
        }
        records.sort_by(|a, b| a.provider.cmp(&b.provider));
        records
    }

    /// Ask a provider for a bulk update, unless it is already known not to
    /// support one.
    ///
    /// The provider's lock is held for the call, so concurrent scans on the
    /// same provider don't all run detection at once.
    pub async fn bulk(&self, provider: &dyn Provider) -> BulkOutcome {
        let name = provider.name();
        let entry = self.entry(name);
        let mut record = entry.lock().await;
        if record.support == Support::Unsupported {
            return BulkOutcome::Unsupported;
        }
        let Some(bulk) = provider.bulk() else {
            tracing::info!(provider = %name, "provider has no bulk capability");
            self.store(&mut record, Support::Unsupported).await;
            return BulkOutcome::Unsupported;
        };
        match bulk.bulk_update().await {
            Ok(changes) => {
                if record.support != Support::Supported {
                    tracing::info!(provider = %name, "provider supports bulk updates");
                }
                self.store(&mut record, Support::Supported).await;
                BulkOutcome::Changes(changes)
            },
            Err(e) if *e == ProviderErrorKind::NotSupported => {
                tracing::info!(provider = %name, "provider refused bulk update");
                self.store(&mut record, Support::Unsupported).await;
                BulkOutcome::Unsupported
            },
            Err(e) => {
                tracing::warn!(provider = %name, error = ?e, support = ?record.support, "bulk update failed");
                BulkOutcome::Failed(e)
            },
        }
    }

    /// Forget what is known about a provider, so the next run detects its
    /// capability again.
    pub async fn redetect(&self, provider: &str) -> Result<()> {
        let entry = self.entry(provider);
        let mut record = entry.lock().await;
        *record = CapabilityRecord::unknown(provider);
        self.repo.upsert(&record).await.or_raise(|| ErrorKind::Store)?;
        tracing::info!(provider = %provider, "capability reset for re-detection");
        Ok(())
    }

    fn entry(&self, provider: &str) -> Arc<Mutex<CapabilityRecord>> {
        self.records
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(CapabilityRecord::unknown(provider))))
            .clone()
    }

    /// Update the in-memory record, then write it through. A failed write
    /// only costs a repeated detection after restart.
    async fn store(&self, record: &mut CapabilityRecord, support: Support) {
        *record = record.clone().with_support(support, OffsetDateTime::now_utc());
        if let Err(e) = self.repo.upsert(record).await {
            tracing::warn!(provider = %record.provider, error = ?e, "could not persist capability");
        }
    }
}
