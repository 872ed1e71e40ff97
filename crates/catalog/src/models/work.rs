use crate::models::{Chapter, Fingerprint};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use time::OffsetDateTime;

/// Processing state of a work.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkStatus {
    #[default]
    #[display("active")]
    Active,
    #[display("quarantined")]
    Quarantined,
    #[display("processing")]
    Processing,
}

/// A tracked series, owned by exactly one [`Scan`](crate::Scan).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Work {
    pub id: String,
    pub title: String,
    /// Provider-relative locator (URL path or slug) used to fetch the work.
    pub locator: String,
    #[serde(default)]
    pub status: WorkStatus,
    #[serde(default)]
    pub consecutive_error_count: u32,
    #[serde(default)]
    pub available_chapters: Vec<Chapter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chapters: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "time::serde::rfc3339::option")]
    pub last_check: Option<OffsetDateTime>,
    /// Message of the most recent failed check, cleared on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}
impl Work {
    pub fn new(id: impl Into<String>, title: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            locator: locator.into(),
            status: WorkStatus::Active,
            consecutive_error_count: 0,
            available_chapters: Vec::new(),
            total_chapters: None,
            last_check: None,
            last_error: None,
        }
    }

    pub fn with_chapters(mut self, chapters: impl IntoIterator<Item = Chapter>) -> Self {
        self.available_chapters = chapters.into_iter().collect();
        self
    }

    pub fn with_status(mut self, status: WorkStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_error_count(mut self, count: u32) -> Self {
        self.consecutive_error_count = count;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == WorkStatus::Active
    }

    pub fn is_quarantined(&self) -> bool {
        self.status == WorkStatus::Quarantined
    }

    /// Fingerprint of the chapters currently known for this work.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.available_chapters)
    }

    /// Chapters in `fetched` that this work doesn't know about yet, in the
    /// order they were fetched. Repeated ids are reported once.
    pub fn new_chapters<'a>(&self, fetched: &'a [Chapter]) -> Vec<&'a Chapter> {
        let mut seen: HashSet<&str> = self.available_chapters.iter().map(|c| c.id.as_str()).collect();
        fetched.iter().filter(|c| seen.insert(c.id.as_str())).collect()
    }

    /// Append every unknown chapter from `fetched`, returning the ones added.
    pub fn merge_chapters(&mut self, fetched: &[Chapter]) -> Vec<Chapter> {
        let added: Vec<Chapter> = self.new_chapters(fetched).into_iter().cloned().collect();
        self.available_chapters.extend(added.iter().cloned());
        added
    }

    /// Record a successful check.
    pub fn record_success(&mut self, now: OffsetDateTime) {
        self.consecutive_error_count = 0;
        self.last_error = None;
        self.last_check = Some(now);
    }

    /// Record a failed check, returning the new consecutive error count.
    pub fn record_error(&mut self, reason: impl Into<String>, now: OffsetDateTime) -> u32 {
        self.consecutive_error_count = self.consecutive_error_count.saturating_add(1);
        self.last_error = Some(reason.into());
        self.last_check = Some(now);
        self.consecutive_error_count
    }
}
