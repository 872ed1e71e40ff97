//! What an update check found, per scan and per batch.

use derive_more::Display;
use scanwatch_catalog::Chapter;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use time::OffsetDateTime;

/// How a scan's works were checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMethod {
    /// One bulk call for the whole scan.
    #[display("optimized")]
    Optimized,
    /// One fetch per work.
    #[display("fallback")]
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    /// The check couldn't run or died part way; nothing it did was saved.
    Failed(String),
    /// The batch deadline passed before the check finished.
    TimedOut,
}

/// A work that has new chapters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkUpdate {
    pub work_id: String,
    pub title: String,
    pub locator: String,
    pub new_chapters: Vec<Chapter>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateResult {
    pub scan_name: String,
    pub method: UpdateMethod,
    pub updates: Vec<WorkUpdate>,
    /// Works checked against the provider this run. Cache hits don't count.
    pub works_checked: usize,
    pub errors: usize,
    pub requests_issued: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    /// Works left alone because they aren't active.
    pub skipped: usize,
    pub duration: Duration,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub outcome: Outcome,
}

impl UpdateResult {
    pub fn new(scan_name: impl Into<String>, method: UpdateMethod) -> Self {
        Self {
            scan_name: scan_name.into(),
            method,
            updates: Vec::new(),
            works_checked: 0,
            errors: 0,
            requests_issued: 0,
            cache_hits: 0,
            cache_misses: 0,
            skipped: 0,
            duration: Duration::ZERO,
            timestamp: OffsetDateTime::now_utc(),
            outcome: Outcome::Completed,
        }
    }

    pub fn failed(scan_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self { outcome: Outcome::Failed(message.into()), ..Self::new(scan_name, UpdateMethod::Fallback) }
    }

    pub fn timed_out(scan_name: impl Into<String>) -> Self {
        Self { outcome: Outcome::TimedOut, ..Self::new(scan_name, UpdateMethod::Fallback) }
    }

    pub fn is_completed(&self) -> bool {
        self.outcome == Outcome::Completed
    }

    pub fn new_chapters(&self) -> usize {
        self.updates.iter().map(|u| u.new_chapters.len()).sum()
    }

    /// Share of checked works that didn't fail, in percent. Nothing checked
    /// means nothing failed.
    pub fn success_rate(&self) -> f64 {
        percentage(self.works_checked.saturating_sub(self.errors), self.works_checked)
    }
}

/// Results of checking several scans at once, in the order they were asked
/// for.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResult {
    pub results: Vec<UpdateResult>,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
    pub duration: Duration,
}

impl BatchResult {
    pub fn total_scans(&self) -> usize {
        self.results.len()
    }

    pub fn successful_scans(&self) -> usize {
        self.results.iter().filter(|r| r.is_completed()).count()
    }

    /// Completed scans out of all scans, in percent; 100 for an empty batch.
    pub fn success_rate(&self) -> f64 {
        percentage(self.successful_scans(), self.total_scans())
    }

    pub fn result_for(&self, scan_name: &str) -> Option<&UpdateResult> {
        self.results.iter().find(|r| r.scan_name == scan_name)
    }

    pub fn works_with_updates(&self) -> usize {
        self.results.iter().map(|r| r.updates.len()).sum()
    }

    pub fn new_chapters(&self) -> usize {
        self.results.iter().map(UpdateResult::new_chapters).sum()
    }

    pub fn requests_issued(&self) -> usize {
        self.results.iter().map(|r| r.requests_issued).sum()
    }

    pub fn cache_hits(&self) -> usize {
        self.results.iter().map(|r| r.cache_hits).sum()
    }

    pub fn errors(&self) -> usize {
        self.results.iter().map(|r| r.errors).sum()
    }

    /// How many completed scans used each method.
    pub fn methods(&self) -> BTreeMap<UpdateMethod, usize> {
        let mut methods = BTreeMap::new();
        for result in self.results.iter().filter(|r| r.is_completed()) {
            *methods.entry(result.method).or_default() += 1;
        }
        methods
    }
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 { 100.0 } else { part as f64 / whole as f64 * 100.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn checked(name: &str, works_checked: usize, errors: usize) -> UpdateResult {
        UpdateResult { works_checked, errors, ..UpdateResult::new(name, UpdateMethod::Fallback) }
    }

    fn batch(results: Vec<UpdateResult>) -> BatchResult {
        let now = OffsetDateTime::now_utc();
        BatchResult { results, started_at: now, finished_at: now, duration: Duration::ZERO }
    }

    #[rstest]
    #[case(0, 0, 100.0)]
    #[case(3, 1, 66.666)]
    #[case(4, 4, 0.0)]
    fn test_scan_success_rate(#[case] works: usize, #[case] errors: usize, #[case] expected: f64) {
        let rate = checked("beta", works, errors).success_rate();
        assert!((rate - expected).abs() < 0.01, "{rate} != {expected}");
    }

    #[test]
    fn test_empty_batch_is_fully_successful() {
        let batch = batch(Vec::new());
        assert_eq!(batch.total_scans(), 0);
        assert_eq!(batch.success_rate(), 100.0);
    }

    #[test]
    fn test_batch_aggregates() {
        let mut optimized = UpdateResult::new("alpha", UpdateMethod::Optimized);
        optimized.requests_issued = 1;
        optimized.updates.push(WorkUpdate {
            work_id: "1".to_string(),
            title: "One".to_string(),
            locator: "/one".to_string(),
            new_chapters: vec![Chapter::new("2"), Chapter::new("3")],
        });
        let mut fallback = checked("beta", 3, 1);
        fallback.requests_issued = 3;
        fallback.cache_hits = 2;
        let batch = batch(vec![optimized, fallback, UpdateResult::failed("gamma", "boom"), UpdateResult::timed_out("delta")]);

        assert_eq!(batch.successful_scans(), 2);
        assert_eq!(batch.success_rate(), 50.0);
        assert_eq!(batch.works_with_updates(), 1);
        assert_eq!(batch.new_chapters(), 2);
        assert_eq!(batch.requests_issued(), 4);
        assert_eq!(batch.cache_hits(), 2);
        assert_eq!(batch.errors(), 1);
        assert_eq!(batch.methods(), BTreeMap::from([(UpdateMethod::Optimized, 1), (UpdateMethod::Fallback, 1)]));
        assert_eq!(batch.result_for("gamma").unwrap().outcome, Outcome::Failed("boom".to_string()));
        assert!(batch.result_for("omega").is_none());
    }
}
