use crate::models::{Work, WorkStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use time::OffsetDateTime;

/// A named catalog of works, all tracked through the same provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scan {
    pub name: String,
    /// Name of the provider plugin that serves this scan.
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "time::serde::rfc3339::option")]
    pub last_check: Option<OffsetDateTime>,
    #[serde(default)]
    pub works: Vec<Work>,
}

/// Per-status tallies for a scan.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanSummary {
    pub total: usize,
    pub active: usize,
    pub quarantined: usize,
    pub processing: usize,
    pub chapters: usize,
}

impl Scan {
    pub fn new(name: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider: provider.into(),
            base_url: None,
            description: None,
            last_check: None,
            works: Vec::new(),
        }
    }

    pub fn with_works(mut self, works: impl IntoIterator<Item = Work>) -> Self {
        self.works = works.into_iter().collect();
        self
    }

    /// Add a work, refusing (and returning `false`) if the id is taken.
    pub fn add_work(&mut self, work: Work) -> bool {
        if self.work(&work.id).is_some() {
            return false;
        }
        self.works.push(work);
        true
    }

    pub fn work(&self, id: &str) -> Option<&Work> {
        self.works.iter().find(|w| w.id == id)
    }

    pub fn work_mut(&mut self, id: &str) -> Option<&mut Work> {
        self.works.iter_mut().find(|w| w.id == id)
    }

    pub fn work_by_locator(&self, locator: &str) -> Option<&Work> {
        self.works.iter().find(|w| w.locator == locator)
    }

    /// Case-insensitive title lookup; first match in catalog order wins.
    pub fn work_by_title(&self, title: &str) -> Option<&Work> {
        let title = title.to_lowercase();
        self.works.iter().find(|w| w.title.to_lowercase() == title)
    }

    pub fn active_works(&self) -> impl Iterator<Item = &Work> {
        self.works.iter().filter(|w| w.is_active())
    }

    pub fn quarantined_works(&self) -> impl Iterator<Item = &Work> {
        self.works.iter().filter(|w| w.is_quarantined())
    }

    /// First work id that appears more than once, if any.
    pub fn duplicate_work_id(&self) -> Option<&str> {
        let mut seen = HashSet::new();
        self.works.iter().map(|w| w.id.as_str()).find(|id| !seen.insert(*id))
    }

    pub fn summary(&self) -> ScanSummary {
        self.works.iter().fold(ScanSummary::default(), |mut summary, work| {
            summary.total += 1;
            summary.chapters += work.available_chapters.len();
            match work.status {
                WorkStatus::Active => summary.active += 1,
                WorkStatus::Quarantined => summary.quarantined += 1,
                WorkStatus::Processing => summary.processing += 1,
            }
            summary
        })
    }
}
