//! End-to-end checks through the `Tracker`, against an in-memory catalog and
//! database and scripted providers.

use scanwatch::Tracker;
use scanwatch::config::Config;
use scanwatch_catalog::{Chapter, Scan, Work, WorkStatus};
use scanwatch_db::{CacheEntry, CacheRepository, Database, QuarantineAction};
use scanwatch_storage::backend::MockBackend;
use scanwatch_updates::{
    BulkChange, ChapterListing, Outcome, ProviderErrorKind, Providers, ScriptedProvider, UpdateMethod,
};
use std::sync::Arc;
use time::OffsetDateTime;

fn config() -> Config {
    let mut config = Config::default();
    config.updates.request_delay_ms = 0;
    config.updates.retry_delay_ms = 0;
    config
}

fn work(id: &str, chapters: &[&str]) -> Work {
    Work::new(id, format!("Work {id}"), format!("/manga/{id}")).with_chapters(chapters.iter().map(|c| Chapter::new(*c)))
}

fn providers(provider: Arc<ScriptedProvider>) -> Providers {
    Providers::new().with(provider)
}

async fn tracker(scans: Vec<Scan>, providers: Providers) -> Tracker {
    tracker_with_db(scans, providers, Database::connect_in_memory().await.unwrap()).await
}

async fn tracker_with_db(scans: Vec<Scan>, providers: Providers, db: Database) -> Tracker {
    let tracker = Tracker::with_parts(config(), Arc::new(MockBackend::default()), db, providers).await.unwrap();
    for scan in scans {
        tracker.catalog().save(&scan.name, &scan).await.unwrap();
    }
    tracker
}

#[tokio::test]
async fn bulk_capable_provider_takes_the_optimized_path() {
    let scan = Scan::new("alpha", "bulky").with_works([work("1", &["1"]), work("2", &["1"]), work("3", &["1"])]);
    let provider = Arc::new(ScriptedProvider::new("bulky").with_bulk(vec![BulkChange {
        work_ref: "/manga/2".to_string(),
        title: "Work 2".to_string(),
        listing: ChapterListing::new([Chapter::new("1"), Chapter::new("2")]),
    }]));
    let tracker = tracker(vec![scan], providers(provider.clone())).await;

    let result = tracker.check_scan_updates("alpha").await.unwrap();
    assert_eq!(result.method, UpdateMethod::Optimized);
    assert_eq!(result.updates.len(), 1);
    assert_eq!(result.updates[0].work_id, "2");
    assert_eq!(result.requests_issued, 1);
    assert_eq!(provider.fetch_calls(), 0);
    assert_eq!(tracker.load_scan("alpha").await.unwrap().work("2").unwrap().available_chapters.len(), 2);
}

#[tokio::test]
async fn fallback_counts_cache_hits_and_errors() {
    let works: Vec<_> = (1..=5).map(|i| work(&i.to_string(), &["1", "2"])).collect();
    let db = Database::connect_in_memory().await.unwrap();
    // Works 1 and 2 were checked a moment ago and haven't changed since.
    let repo = CacheRepository::from(&db);
    for work in &works[..2] {
        let entry = CacheEntry::new("beta", &work.id, work.fingerprint().as_str(), OffsetDateTime::now_utc());
        repo.upsert(&entry).await.unwrap();
    }
    let provider = Arc::new(
        ScriptedProvider::new("plain")
            .with_chapters("/manga/3", &["1", "2", "3"])
            .with_chapters("/manga/4", &["1", "2"]),
    );
    provider.fail("/manga/5", ProviderErrorKind::Network("connection reset".to_string()));
    let tracker = tracker_with_db(vec![Scan::new("beta", "plain").with_works(works)], providers(provider.clone()), db).await;

    let result = tracker.check_scan_updates("beta").await.unwrap();
    assert_eq!(result.method, UpdateMethod::Fallback);
    assert_eq!(result.requests_issued, 3);
    assert_eq!(result.cache_hits, 2);
    assert_eq!(result.cache_misses, 3);
    assert_eq!(result.works_checked, 3);
    assert_eq!(result.errors, 1);
    assert!((result.success_rate() - 66.7).abs() < 0.1);
    assert_eq!(result.updates.len(), 1);
    assert_eq!(provider.fetch_calls(), 3);

    let scan = tracker.load_scan("beta").await.unwrap();
    assert_eq!(scan.work("5").unwrap().consecutive_error_count, 1);
    assert_eq!(scan.work("5").unwrap().last_error.as_deref(), Some("network error: connection reset"));
}

#[tokio::test]
async fn repeated_check_is_idempotent() {
    let provider = Arc::new(ScriptedProvider::new("plain").with_chapters("/manga/1", &["1", "2", "3"]));
    let tracker = tracker(vec![Scan::new("gamma", "plain").with_works([work("1", &["1"])])], providers(provider.clone())).await;

    let first = tracker.check_scan_updates("gamma").await.unwrap();
    assert_eq!(first.new_chapters(), 2);
    let second = tracker.check_scan_updates("gamma").await.unwrap();
    assert_eq!(second.new_chapters(), 0);
    assert_eq!(second.errors, 0);
    assert_eq!(second.cache_hits, 1);
    assert_eq!(provider.fetch_calls(), 1);
}

#[tokio::test]
async fn tenth_consecutive_error_quarantines() {
    let provider = Arc::new(ScriptedProvider::new("plain"));
    provider.fail("/manga/a", ProviderErrorKind::Timeout);
    let scan = Scan::new("delta", "plain").with_works([work("a", &["1"]).with_error_count(9)]);
    let tracker = tracker(vec![scan], providers(provider)).await;

    let result = tracker.check_scan_updates("delta").await.unwrap();
    assert_eq!(result.errors, 1);
    let scan = tracker.load_scan("delta").await.unwrap();
    let work = scan.work("a").unwrap();
    assert_eq!(work.consecutive_error_count, 10);
    assert_eq!(work.status, WorkStatus::Quarantined);

    let events = tracker.get_recent_events(10).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, QuarantineAction::Quarantine);
    assert!(tracker.is_quarantined("delta", "a").await.unwrap());
    assert_eq!(tracker.list_quarantined("delta").await.unwrap().len(), 1);
    let stats = tracker.get_stats().await.unwrap();
    assert_eq!(stats.total_quarantined, 1);
    assert_eq!(stats.auto_quarantines_today, 1);

    // Quarantined works are no longer fetched.
    let result = tracker.check_scan_updates("delta").await.unwrap();
    assert_eq!(result.skipped, 1);
    assert_eq!(result.requests_issued, 0);
}

#[tokio::test]
async fn restore_requires_a_fresh_run_of_errors() {
    let provider = Arc::new(ScriptedProvider::new("plain"));
    provider.fail("/manga/a", ProviderErrorKind::Timeout);
    let scan = Scan::new("delta", "plain").with_works([work("a", &["1"]).with_error_count(10)]);
    let tracker = tracker(vec![scan], providers(provider)).await;
    tracker.sweep().await.unwrap();
    assert!(tracker.is_quarantined("delta", "a").await.unwrap());

    let event = tracker.restore_work("delta", "a", true).await.unwrap();
    assert_eq!(event.action, QuarantineAction::ManualRestore);
    assert_eq!(tracker.load_scan("delta").await.unwrap().work("a").unwrap().consecutive_error_count, 0);

    for _ in 0..9 {
        tracker.check_scan_updates("delta").await.unwrap();
    }
    assert!(!tracker.is_quarantined("delta", "a").await.unwrap());
    tracker.check_scan_updates("delta").await.unwrap();
    assert!(tracker.is_quarantined("delta", "a").await.unwrap());
    assert_eq!(tracker.get_stats().await.unwrap().manual_restores_today, 1);
}

#[tokio::test]
async fn not_supported_is_remembered_until_redetected() {
    let provider = Arc::new(
        ScriptedProvider::new("refuser")
            .with_bulk_error(ProviderErrorKind::NotSupported)
            .with_chapters("/manga/1", &["1"]),
    );
    let tracker = tracker(vec![Scan::new("eps", "refuser").with_works([work("1", &["1"])])], providers(provider.clone())).await;

    for _ in 0..3 {
        let result = tracker.check_scan_updates("eps").await.unwrap();
        assert_eq!(result.method, UpdateMethod::Fallback);
    }
    assert_eq!(provider.bulk_calls(), 1);

    tracker.redetect_capability("refuser").await.unwrap();
    tracker.check_scan_updates("eps").await.unwrap();
    assert_eq!(provider.bulk_calls(), 2);
}

#[tokio::test]
async fn batch_isolates_failing_scans() {
    let provider = Arc::new(ScriptedProvider::new("plain").with_chapters("/manga/1", &["1", "2"]));
    let tracker = tracker(vec![Scan::new("alpha", "plain").with_works([work("1", &["1"])])], providers(provider)).await;

    let batch = tracker.check_many(["alpha", "missing"]).await;
    assert_eq!(batch.total_scans(), 2);
    assert_eq!(batch.successful_scans(), 1);
    assert_eq!(batch.success_rate(), 50.0);
    assert!(matches!(batch.result_for("missing").unwrap().outcome, Outcome::Failed(_)));
    assert_eq!(batch.new_chapters(), 1);

    let empty = tracker.check_many(Vec::<String>::new()).await;
    assert_eq!(empty.success_rate(), 100.0);
}

#[tokio::test]
async fn purge_cache_keeps_fresh_entries() {
    let provider = Arc::new(ScriptedProvider::new("plain").with_chapters("/manga/1", &["1"]));
    let tracker = tracker(vec![Scan::new("zeta", "plain").with_works([work("1", &["1"])])], providers(provider)).await;
    tracker.check_scan_updates("zeta").await.unwrap();
    assert_eq!(tracker.cache_stats().valid, 1);
    assert_eq!(tracker.purge_cache().await.unwrap(), 0);
    assert_eq!(tracker.clear_cache().await.unwrap(), 1);
    assert_eq!(tracker.cache_stats().total, 0);
}
