//! Update cache fingerprints.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{CacheEntry, CacheRow, to_unix_nanos};
use exn::ResultExt;
use sqlx::SqlitePool;
use time::OffsetDateTime;

/// Repository for the `update_cache` table.
///
/// This is only the persistent half of the update cache; the hot path reads
/// an in-memory map that is written through to here.
#[derive(Debug, Clone)]
pub struct CacheRepository {
    pool: SqlitePool,
}
impl From<&Database> for CacheRepository {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl CacheRepository {
    pub async fn upsert(&self, entry: &CacheEntry) -> Result<()> {
        sqlx::query(include_str!("../../queries/upsert_cache_entry.sql"))
            .bind(&entry.scan_name)
            .bind(&entry.work_id)
            .bind(&entry.fingerprint)
            .bind(to_unix_nanos(entry.checked_at, "cache checked_at")?)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    pub async fn get(&self, scan_name: &str, work_id: &str) -> Result<Option<CacheEntry>> {
        let row: Option<CacheRow> = sqlx::query_as(include_str!("../../queries/get_cache_entry.sql"))
            .bind(scan_name)
            .bind(work_id)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(CacheEntry::try_from).transpose()
    }

    pub async fn list(&self) -> Result<Vec<CacheEntry>> {
        let rows: Vec<CacheRow> = sqlx::query_as(include_str!("../../queries/list_cache_entries.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(CacheEntry::try_from).collect()
    }

    /// Delete every entry recorded before `cutoff`, returning how many went.
    pub async fn delete_older_than(&self, cutoff: OffsetDateTime) -> Result<u64> {
        let result = sqlx::query(include_str!("../../queries/delete_expired_cache.sql"))
            .bind(to_unix_nanos(cutoff, "cache cutoff")?)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected())
    }

    pub async fn clear(&self) -> Result<u64> {
        let result = sqlx::query(include_str!("../../queries/clear_cache.sql"))
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected())
    }
}
