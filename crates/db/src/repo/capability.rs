//! Provider capability records.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{CapabilityRecord, CapabilityRow, to_unix_nanos};
use exn::ResultExt;
use sqlx::SqlitePool;

#[derive(Debug, Clone)]
pub struct CapabilityRepository {
    pool: SqlitePool,
}
impl From<&Database> for CapabilityRepository {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl CapabilityRepository {
    pub async fn upsert(&self, record: &CapabilityRecord) -> Result<()> {
        sqlx::query(include_str!("../../queries/upsert_capability.sql"))
            .bind(&record.provider)
            .bind(record.support.to_column())
            .bind(record.last_checked.map(|t| to_unix_nanos(t, "capability last_checked")).transpose()?)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    pub async fn get(&self, provider: &str) -> Result<Option<CapabilityRecord>> {
        let row: Option<CapabilityRow> = sqlx::query_as(include_str!("../../queries/get_capability.sql"))
            .bind(provider)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(CapabilityRecord::try_from).transpose()
    }

    pub async fn list(&self) -> Result<Vec<CapabilityRecord>> {
        let rows: Vec<CapabilityRow> = sqlx::query_as(include_str!("../../queries/list_capabilities.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(CapabilityRecord::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Support;
    use time::OffsetDateTime;

    #[tokio::test]
    async fn test_tri_state_round_trips() {
        let repo = CapabilityRepository::from(&Database::connect_in_memory().await.unwrap());
        let now = OffsetDateTime::from_unix_timestamp(1_767_225_600).unwrap();
        repo.upsert(&CapabilityRecord::unknown("asura")).await.unwrap();
        repo.upsert(&CapabilityRecord::unknown("mangadex").with_support(Support::Supported, now)).await.unwrap();
        repo.upsert(&CapabilityRecord::unknown("reaper").with_support(Support::Unsupported, now)).await.unwrap();
        let records = repo.list().await.unwrap();
        let support: Vec<_> = records.iter().map(|r| (r.provider.as_str(), r.support)).collect();
        assert_eq!(
            support,
            vec![("asura", Support::Unknown), ("mangadex", Support::Supported), ("reaper", Support::Unsupported)]
        );
        assert_eq!(repo.get("mangadex").await.unwrap().unwrap().last_checked, Some(now));
        assert!(repo.get("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reset_to_unknown() {
        let repo = CapabilityRepository::from(&Database::connect_in_memory().await.unwrap());
        let now = OffsetDateTime::from_unix_timestamp(1_767_225_600).unwrap();
        repo.upsert(&CapabilityRecord::unknown("reaper").with_support(Support::Unsupported, now)).await.unwrap();
        repo.upsert(&CapabilityRecord::unknown("reaper")).await.unwrap();
        assert_eq!(repo.get("reaper").await.unwrap().unwrap().support, Support::Unknown);
    }
}
