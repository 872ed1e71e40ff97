//! Fingerprint cache of recently checked works.
//!
//! A fresh entry whose fingerprint still matches the catalog means nothing
//! changed since the last check, so the work needn't be fetched again. The
//! map is the hot path; every write goes through to SQLite so a restart
//! starts warm. Losing entries only ever costs re-fetches.

use crate::error::{ErrorKind, Result};
use dashmap::DashMap;
use exn::ResultExt;
use scanwatch_catalog::Fingerprint;
use scanwatch_db::{CacheEntry, CacheRepository};
use serde::Serialize;
use std::time::Duration;
use time::OffsetDateTime;

pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

type Key = (String, String);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub total: usize,
    pub expired: usize,
    pub valid: usize,
}

pub struct UpdateCache {
    entries: DashMap<Key, CacheEntry>,
    repo: CacheRepository,
    ttl: Duration,
}

impl UpdateCache {
    /// Warm the cache from the store. Entries already past their TTL are
    /// loaded too; they're simply never fresh.
    pub async fn load(repo: CacheRepository, ttl: Duration) -> Result<Self> {
        let entries = DashMap::new();
        for entry in repo.list().await.or_raise(|| ErrorKind::Store)? {
            entries.insert((entry.scan_name.clone(), entry.work_id.clone()), entry);
        }
        tracing::debug!(entries = entries.len(), ttl_secs = ttl.as_secs(), "loaded update cache");
        Ok(Self { entries, repo, ttl })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The entry for a work, stale or not.
    pub fn get(&self, scan_name: &str, work_id: &str) -> Option<CacheEntry> {
        self.entries.get(&key(scan_name, work_id)).map(|e| e.value().clone())
    }

    /// The entry for a work, if it is still within its TTL.
    pub fn fresh(&self, scan_name: &str, work_id: &str, now: OffsetDateTime) -> Option<CacheEntry> {
        self.get(scan_name, work_id).filter(|entry| !self.is_stale(entry, now))
    }

    pub fn is_stale(&self, entry: &CacheEntry, now: OffsetDateTime) -> bool {
        entry.is_stale(now, self.ttl)
    }

    /// Record a work's fingerprint as of `now`.
    pub async fn put(&self, scan_name: &str, work_id: &str, fingerprint: &Fingerprint, now: OffsetDateTime) {
        let entry = CacheEntry::new(scan_name, work_id, fingerprint.as_str(), now);
        self.entries.insert(key(scan_name, work_id), entry.clone());
        if let Err(e) = self.repo.upsert(&entry).await {
            tracing::warn!(scan = %scan_name, work = %work_id, error = ?e, "could not persist cache entry");
        }
    }

    /// Drop every stale entry, returning how many there were.
    pub async fn purge_expired(&self, now: OffsetDateTime) -> Result<usize> {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_stale(now, self.ttl));
        let purged = before.saturating_sub(self.entries.len());
        // Stale means strictly older than the TTL, so anything recorded before
        // the cutoff goes.
        let cutoff = now - self.ttl;
        let deleted = self.repo.delete_older_than(cutoff).await.or_raise(|| ErrorKind::Store)?;
        tracing::info!(purged, deleted, "purged expired cache entries");
        Ok(purged)
    }

    /// Drop everything.
    pub async fn clear(&self) -> Result<usize> {
        let cleared = self.entries.len();
        self.entries.clear();
        self.repo.clear().await.or_raise(|| ErrorKind::Store)?;
        tracing::info!(cleared, "cleared update cache");
        Ok(cleared)
    }

    pub fn stats(&self, now: OffsetDateTime) -> CacheStats {
        let total = self.entries.len();
        let expired = self.entries.iter().filter(|e| e.value().is_stale(now, self.ttl)).count();
        CacheStats { total, expired, valid: total - expired }
    }
}

fn key(scan_name: &str, work_id: &str) -> Key {
    (scan_name.to_string(), work_id.to_string())
}
