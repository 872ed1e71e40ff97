use crate::error::Error;
use crate::models::from_unix_nanos;
use std::time::Duration;
use time::OffsetDateTime;

/// Last known fingerprint of a work's chapter list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub scan_name: String,
    pub work_id: String,
    pub fingerprint: String,
    pub checked_at: OffsetDateTime,
}
impl CacheEntry {
    pub fn new(
        scan_name: impl Into<String>,
        work_id: impl Into<String>,
        fingerprint: impl Into<String>,
        checked_at: OffsetDateTime,
    ) -> Self {
        Self {
            scan_name: scan_name.into(),
            work_id: work_id.into(),
            fingerprint: fingerprint.into(),
            checked_at,
        }
    }

    /// An entry is stale once strictly more than `ttl` has passed since it
    /// was recorded.
    pub fn is_stale(&self, now: OffsetDateTime, ttl: Duration) -> bool {
        now - self.checked_at > ttl
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct CacheRow {
    pub scan_name: String,
    pub work_id: String,
    pub fingerprint: String,
    pub checked_at: i64,
}
impl TryFrom<CacheRow> for CacheEntry {
    type Error = Error;
    fn try_from(row: CacheRow) -> Result<Self, Self::Error> {
        Ok(Self {
            scan_name: row.scan_name,
            work_id: row.work_id,
            fingerprint: row.fingerprint,
            checked_at: from_unix_nanos(row.checked_at, "cache checked_at")?,
        })
    }
}
