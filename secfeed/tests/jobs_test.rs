mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use common::{article, rss, Harness, Item, ScriptedBackend, PLAUSIBLE_SUMMARY};
use interfaces::{ArticleStatus, ArticleStore};
use secfeed::{PipelineError, ScheduleConfig, Scheduler};
use tokio::sync::watch;

fn backend() -> Arc<ScriptedBackend> {
    Arc::new(ScriptedBackend::always(PLAUSIBLE_SUMMARY))
}

#[tokio::test]
async fn test_watchdog_resets_only_stuck_articles() {
    let h = Harness::new(backend());
    let now = Utc::now();

    let mut stuck = article("https://x.com/stuck", "malware", ArticleStatus::Processing, now);
    stuck.claimed_at = Some(now - ChronoDuration::minutes(10));
    let mut fresh = article("https://x.com/fresh", "malware", ArticleStatus::Processing, now);
    fresh.claimed_at = Some(now);
    let (stuck_id, fresh_id) = (stuck.id, fresh.id);
    h.store.put_article(stuck).await;
    h.store.put_article(fresh).await;

    let reset = h.pipeline.watchdog().await.unwrap();
    assert_eq!(reset, 1);

    let status = |id| {
        let store = h.store.clone();
        async move { store.get_article(id).await.unwrap().unwrap().status }
    };
    assert_eq!(status(stuck_id).await, ArticleStatus::Pending);
    assert_eq!(status(fresh_id).await, ArticleStatus::Processing);
    assert!(h
        .activity_messages()
        .contains(&"Watchdog: reset 1 stuck 'processing' articles → pending".to_string()));
}

#[tokio::test]
async fn test_startup_recovery_resets_all_processing() {
    let h = Harness::new(backend());
    let now = Utc::now();
    for i in 0..3 {
        let mut row = article(&format!("https://x.com/{i}"), "malware", ArticleStatus::Processing, now);
        row.claimed_at = Some(now);
        h.store.put_article(row).await;
    }

    assert_eq!(h.pipeline.recover_on_startup().await.unwrap(), 3);
    assert_eq!(h.store.status_counts().await.unwrap().pending, 3);
    assert_eq!(h.pipeline.recover_on_startup().await.unwrap(), 0);
}

#[tokio::test]
async fn test_purge_protects_categories_without_recent_summaries() {
    let h = Harness::new(backend());
    let now = Utc::now();
    let old = now - ChronoDuration::days(5);

    let recent_malware = article("https://x.com/m-new", "malware", ArticleStatus::Done, now);
    let old_malware = article("https://x.com/m-old", "malware", ArticleStatus::Done, old);
    let old_privacy = article("https://x.com/p-old", "privacy", ArticleStatus::Done, old);
    let old_pending = article("https://x.com/p-pending", "privacy", ArticleStatus::Pending, old);
    let old_failed = article("https://x.com/m-failed", "malware", ArticleStatus::Failed, old);
    let kept = [recent_malware.id, old_privacy.id];
    for row in [recent_malware, old_malware, old_privacy, old_pending, old_failed] {
        h.store.put_article(row).await;
    }

    let report = h.pipeline.purge_expired().await.unwrap();
    assert_eq!(report.removed_unsummarised, 2);
    assert_eq!(report.removed_done, 1);
    assert_eq!(report.protected_categories, vec!["privacy".to_string()]);

    let remaining: Vec<_> = h.store.articles().await.into_iter().map(|a| a.id).collect();
    assert_eq!(remaining.len(), 2);
    assert!(kept.iter().all(|id| remaining.contains(id)));
    assert!(h
        .activity_messages()
        .iter()
        .any(|m| m.starts_with("Purge: removed 3 old articles")));
}

#[tokio::test]
async fn test_purge_with_unrepresentable_retention_is_an_error() {
    let schedule = ScheduleConfig {
        retention_days: i64::MAX / 1000,
        ..ScheduleConfig::default()
    };
    let h = Harness::with_schedule(backend(), schedule);
    h.store
        .put_article(article("https://x.com/a", "malware", ArticleStatus::Done, Utc::now()))
        .await;

    assert!(matches!(
        h.pipeline.purge_expired().await,
        Err(PipelineError::Config(_))
    ));
    assert_eq!(h.store.articles().await.len(), 1);
}

#[tokio::test]
async fn test_retry_failed_requeues_and_summarises() {
    let h = Harness::new(backend());
    let row = article("https://x.com/a", "malware", ArticleStatus::Failed, Utc::now());
    let id = row.id;
    h.store.put_article(row).await;

    let (reset, batch) = h.pipeline.retry_failed().await.unwrap();
    assert_eq!(reset, 1);
    assert_eq!(batch.map(|b| b.done), Some(1));
    assert_eq!(
        h.store.get_article(id).await.unwrap().unwrap().status,
        ArticleStatus::Done
    );
    assert!(h
        .activity_messages()
        .contains(&"Auto-retry: resetting 1 failed articles → pending".to_string()));

    let (reset, batch) = h.pipeline.retry_failed().await.unwrap();
    assert_eq!(reset, 0);
    assert!(batch.is_none());
}

#[tokio::test]
async fn test_scheduler_runs_initial_cycle_and_stops() {
    let schedule = ScheduleConfig {
        startup_delay: Duration::ZERO,
        fetch_interval: Duration::from_secs(3600),
        watchdog_interval: Duration::from_secs(3600),
        retry_interval: Duration::from_secs(3600),
        ..ScheduleConfig::default()
    };
    let h = Harness::with_schedule(backend(), schedule);
    h.add_source("Example", "https://feed.example/rss").await;
    h.feeds.serve(
        "https://feed.example/rss",
        rss(
            "Example Security Feed",
            &[Item::new(
                "Ransomware hits hospital",
                "https://x.com/a",
                "A hospital network was hit by a ransomware gang that encrypted patient records.",
            )],
        ),
    );

    // An article orphaned by a previous process.
    let mut orphan = article("https://x.com/orphan", "malware", ArticleStatus::Processing, Utc::now());
    orphan.claimed_at = Some(Utc::now());
    h.store.put_article(orphan).await;

    let Harness { store, pipeline, .. } = h;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = tokio::spawn(Scheduler::new(Arc::new(pipeline)).run(shutdown_rx));

    let mut settled = false;
    for _ in 0..100 {
        let counts = store.status_counts().await.unwrap();
        if counts.done == 2 {
            settled = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(settled, "initial cycle did not summarise both articles");

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), scheduler)
        .await
        .expect("scheduler did not stop")
        .unwrap()
        .unwrap();
}
