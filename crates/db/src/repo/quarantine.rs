//! Quarantine event log, sweep records and the statistics snapshot.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{EventRow, QuarantineEvent, from_unix_nanos, to_unix_nanos};
use crate::repo::limit;
use exn::ResultExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::SqlitePool;
use time::OffsetDateTime;

/// Repository for the quarantine tables.
///
/// `quarantine_events` is append-only: the schema rejects updates and
/// deletes.
#[derive(Debug, Clone)]
pub struct QuarantineRepository {
    pool: SqlitePool,
}
impl From<&Database> for QuarantineRepository {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl QuarantineRepository {
    /// Append an event, returning it with its log sequence number filled in.
    pub async fn append(&self, event: &QuarantineEvent) -> Result<QuarantineEvent> {
        let (id,): (i64,) = sqlx::query_as(include_str!("../../queries/insert_event.sql"))
            .bind(&event.scan_name)
            .bind(&event.work_id)
            .bind(&event.title)
            .bind(event.action.to_string())
            .bind(&event.reason)
            .bind(i64::from(event.error_count))
            .bind(event.actor.as_deref())
            .bind(to_unix_nanos(event.occurred_at, "event occurred_at")?)
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        tracing::debug!(id, scan = %event.scan_name, work = %event.work_id, action = %event.action, "appended quarantine event");
        Ok(QuarantineEvent { id: Some(id), ..event.clone() })
    }

    /// The whole log, oldest first.
    pub async fn events(&self) -> Result<Vec<QuarantineEvent>> {
        let rows: Vec<EventRow> = sqlx::query_as(include_str!("../../queries/list_events.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(QuarantineEvent::try_from).collect()
    }

    /// One scan's events, oldest first.
    pub async fn events_for_scan(&self, scan_name: &str) -> Result<Vec<QuarantineEvent>> {
        let rows: Vec<EventRow> = sqlx::query_as(include_str!("../../queries/list_events_for_scan.sql"))
            .bind(scan_name)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(QuarantineEvent::try_from).collect()
    }

    /// The `count` most recent events, newest first.
    pub async fn recent(&self, count: usize) -> Result<Vec<QuarantineEvent>> {
        let rows: Vec<EventRow> = sqlx::query_as(include_str!("../../queries/recent_events.sql"))
            .bind(limit(count)?)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(QuarantineEvent::try_from).collect()
    }

    /// Record that a quarantine sweep ran over a scan.
    pub async fn record_check(&self, scan_name: &str, at: OffsetDateTime) -> Result<()> {
        sqlx::query(include_str!("../../queries/insert_check.sql"))
            .bind(scan_name)
            .bind(to_unix_nanos(at, "check checked_at")?)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// When the most recent sweep (over any scan) ran.
    pub async fn last_check(&self) -> Result<Option<OffsetDateTime>> {
        let (last,): (Option<i64>,) = sqlx::query_as(include_str!("../../queries/last_check.sql"))
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        last.map(|t| from_unix_nanos(t, "last check")).transpose()
    }

    pub async fn save_snapshot<T: Serialize>(&self, snapshot: &T, at: OffsetDateTime) -> Result<()> {
        let data = serde_json::to_string(snapshot).or_raise(|| ErrorKind::InvalidData("stats snapshot"))?;
        sqlx::query(include_str!("../../queries/upsert_snapshot.sql"))
            .bind(data)
            .bind(to_unix_nanos(at, "snapshot updated_at")?)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    pub async fn load_snapshot<T: DeserializeOwned>(&self) -> Result<Option<(T, OffsetDateTime)>> {
        let row: Option<(String, i64)> = sqlx::query_as(include_str!("../../queries/get_snapshot.sql"))
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let Some((data, updated_at)) = row else {
            return Ok(None);
        };
        let snapshot = serde_json::from_str(&data).or_raise(|| ErrorKind::InvalidData("stats snapshot"))?;
        Ok(Some((snapshot, from_unix_nanos(updated_at, "snapshot updated_at")?)))
    }
}
