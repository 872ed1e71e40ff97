//! Projections of the quarantine event log.

use scanwatch_db::{QuarantineAction, QuarantineEvent};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use time::{Date, OffsetDateTime};

/// Aggregate quarantine statistics, rebuilt from the event log.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarantineStats {
    pub total_quarantined: usize,
    pub by_scan: BTreeMap<String, usize>,
    /// `quarantine` events whose UTC date is today.
    pub auto_quarantines_today: usize,
    /// `manual_restore` events whose UTC date is today.
    pub manual_restores_today: usize,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_check: Option<OffsetDateTime>,
}

/// Latest action per `(scan, work)`, for events given oldest first.
pub(crate) fn latest_actions<'a>(
    events: impl IntoIterator<Item = &'a QuarantineEvent>,
) -> HashMap<(&'a str, &'a str), QuarantineAction> {
    let mut latest = HashMap::new();
    for event in events {
        latest.insert((event.scan_name.as_str(), event.work_id.as_str()), event.action);
    }
    latest
}

/// Replay the log (oldest first) into statistics as of `today`.
pub fn replay(events: &[QuarantineEvent], today: Date, last_check: Option<OffsetDateTime>) -> QuarantineStats {
    let mut stats = QuarantineStats { last_check, ..QuarantineStats::default() };
    for ((scan, _work), action) in latest_actions(events) {
        if action == QuarantineAction::Quarantine {
            stats.total_quarantined += 1;
            *stats.by_scan.entry(scan.to_string()).or_default() += 1;
        }
    }
    for event in events.iter().filter(|e| e.occurred_at.to_offset(time::UtcOffset::UTC).date() == today) {
        match event.action {
            QuarantineAction::Quarantine => stats.auto_quarantines_today += 1,
            QuarantineAction::ManualRestore => stats.manual_restores_today += 1,
            QuarantineAction::Restore => {},
        }
    }
    stats
}
