use crate::error::{Error, ErrorKind};
use crate::models::from_unix_nanos;
use derive_more::Display;
use exn::ResultExt;
use serde::Serialize;
use std::str::FromStr;
use time::OffsetDateTime;

/// What a quarantine event did to a work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuarantineAction {
    #[display("quarantine")]
    Quarantine,
    /// Automatic restore, e.g. from a scheduled recovery job.
    #[display("restore")]
    Restore,
    #[display("manual_restore")]
    ManualRestore,
}
impl QuarantineAction {
    pub fn is_restore(self) -> bool {
        matches!(self, Self::Restore | Self::ManualRestore)
    }
}
impl FromStr for QuarantineAction {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quarantine" => Ok(Self::Quarantine),
            "restore" => Ok(Self::Restore),
            "manual_restore" => Ok(Self::ManualRestore),
            _ => exn::bail!(ErrorKind::InvalidData("quarantine action")),
        }
    }
}

/// One entry of the append-only quarantine log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuarantineEvent {
    /// Log sequence number; `None` until the event has been appended.
    pub id: Option<i64>,
    pub scan_name: String,
    pub work_id: String,
    pub title: String,
    pub action: QuarantineAction,
    pub reason: String,
    /// The work's consecutive error count when the event happened.
    pub error_count: u32,
    /// Who triggered a manual restore, if anyone said.
    pub actor: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub occurred_at: OffsetDateTime,
}
impl QuarantineEvent {
    pub fn new(
        scan_name: impl Into<String>,
        work_id: impl Into<String>,
        title: impl Into<String>,
        action: QuarantineAction,
        reason: impl Into<String>,
        error_count: u32,
        occurred_at: OffsetDateTime,
    ) -> Self {
        Self {
            id: None,
            scan_name: scan_name.into(),
            work_id: work_id.into(),
            title: title.into(),
            action,
            reason: reason.into(),
            error_count,
            actor: None,
            occurred_at,
        }
    }

    pub fn with_actor(mut self, actor: Option<String>) -> Self {
        self.actor = actor;
        self
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct EventRow {
    pub id: i64,
    pub scan_name: String,
    pub work_id: String,
    pub title: String,
    pub action: String,
    pub reason: String,
    pub error_count: i64,
    pub actor: Option<String>,
    pub occurred_at: i64,
}
impl TryFrom<EventRow> for QuarantineEvent {
    type Error = Error;
    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Some(row.id),
            scan_name: row.scan_name,
            work_id: row.work_id,
            title: row.title,
            action: row.action.parse()?,
            reason: row.reason,
            error_count: u32::try_from(row.error_count).or_raise(|| ErrorKind::InvalidData("error count"))?,
            actor: row.actor,
            occurred_at: from_unix_nanos(row.occurred_at, "event occurred_at")?,
        })
    }
}
