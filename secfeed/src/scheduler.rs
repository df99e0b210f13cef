//! Periodic orchestration of the pipeline jobs.
//!
//! [`Pipeline`] holds the job bodies so they can be run on demand (CLI, tests);
//! [`Scheduler`] drives them on timers until shutdown.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use interfaces::{ArticleStore, PurgeReport};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::activity::{ActivityCategory, ActivityLog};
use crate::ingestion::FeedIngester;
use crate::summariser::Summariser;
use crate::types::{days_before, BatchStats, IngestStats, PipelineError, Result};

#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub fetch_interval: Duration,
    pub watchdog_interval: Duration,
    pub stuck_threshold: Duration,
    pub retry_interval: Duration,
    /// Hour of day (UTC) for the daily purge.
    pub purge_hour: u32,
    pub retention_days: i64,
    /// Delay before the first fetch cycle after startup.
    pub startup_delay: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            fetch_interval: Duration::from_secs(30 * 60),
            watchdog_interval: Duration::from_secs(10 * 60),
            stuck_threshold: Duration::from_secs(5 * 60),
            retry_interval: Duration::from_secs(2 * 60),
            purge_hour: 2,
            retention_days: 3,
            startup_delay: Duration::from_secs(2),
        }
    }
}

pub struct Pipeline {
    store: Arc<dyn ArticleStore>,
    ingester: FeedIngester,
    summariser: Summariser,
    activity: Arc<ActivityLog>,
    schedule: ScheduleConfig,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn ArticleStore>,
        ingester: FeedIngester,
        summariser: Summariser,
        activity: Arc<ActivityLog>,
        schedule: ScheduleConfig,
    ) -> Self {
        Self {
            store,
            ingester,
            summariser,
            activity,
            schedule,
        }
    }

    pub fn ingester(&self) -> &FeedIngester {
        &self.ingester
    }

    pub fn summariser(&self) -> &Summariser {
        &self.summariser
    }

    pub fn activity(&self) -> &Arc<ActivityLog> {
        &self.activity
    }

    pub fn schedule(&self) -> &ScheduleConfig {
        &self.schedule
    }

    /// Anything still `processing` at startup was orphaned by a previous run.
    pub async fn recover_on_startup(&self) -> Result<u64> {
        let reset = self.store.requeue_processing(None).await?;
        if reset > 0 {
            warn!("Startup recovery: reset {} processing articles to pending", reset);
            self.activity.warn(
                ActivityCategory::System,
                format!("Startup recovery: reset {} 'processing' articles → pending", reset),
            );
        }
        Ok(reset)
    }

    pub async fn ingest_and_summarise(&self) -> Result<(IngestStats, BatchStats)> {
        let ingest = self.ingester.ingest_all().await?;
        let batch = self.summariser.run_batch().await?;
        info!("Cycle complete: {:?} / {:?}", ingest, batch);
        Ok((ingest, batch))
    }

    pub async fn purge_expired(&self) -> Result<PurgeReport> {
        let cutoff = days_before(Utc::now(), self.schedule.retention_days).ok_or_else(|| {
            PipelineError::Config(format!(
                "retention of {} days is out of range",
                self.schedule.retention_days
            ))
        })?;
        let report = self.store.purge_expired(cutoff).await?;

        info!(
            "Purged {} old articles ({} unsummarised, {} done); protected categories: {:?}",
            report.total(),
            report.removed_unsummarised,
            report.removed_done,
            report.protected_categories
        );
        self.activity.info(
            ActivityCategory::System,
            format!(
                "Purge: removed {} old articles (retained done articles for low-volume categories)",
                report.total()
            ),
        );
        Ok(report)
    }

    /// Reset articles stuck in `processing` past the threshold.
    pub async fn watchdog(&self) -> Result<u64> {
        let threshold = ChronoDuration::from_std(self.schedule.stuck_threshold)
            .unwrap_or_else(|_| ChronoDuration::minutes(5));
        let reset = self.store.requeue_processing(Some(Utc::now() - threshold)).await?;

        if reset > 0 {
            warn!("Watchdog: reset {} stuck articles back to pending", reset);
            self.activity.warn(
                ActivityCategory::System,
                format!("Watchdog: reset {} stuck 'processing' articles → pending", reset),
            );
        } else {
            debug!("Watchdog: no stuck articles found");
        }
        Ok(reset)
    }

    /// Reset every failed article and, if there were any, summarise again.
    pub async fn retry_failed(&self) -> Result<(u64, Option<BatchStats>)> {
        let reset = self.store.requeue_failed().await?;
        if reset == 0 {
            debug!("Auto-retry: no failed articles found");
            return Ok((0, None));
        }

        info!("Auto-retry: reset {} failed articles to pending", reset);
        self.activity.warn(
            ActivityCategory::Retry,
            format!("Auto-retry: resetting {} failed articles → pending", reset),
        );
        let batch = self.summariser.run_batch().await?;
        Ok((reset, Some(batch)))
    }
}

/// At most one running instance of a job.
struct JobSlot {
    name: &'static str,
    handle: Option<JoinHandle<()>>,
}

impl JobSlot {
    fn new(name: &'static str) -> Self {
        Self { name, handle: None }
    }

    fn is_busy(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Spawn `job` unless the previous run is still going. Returns whether it started.
    fn trigger<F>(&mut self, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_busy() {
            debug!("Job {} still running, skipping this tick", self.name);
            return false;
        }
        self.handle = Some(tokio::spawn(job));
        true
    }

    fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            if !handle.is_finished() {
                info!("Stopping in-flight job: {}", self.name);
                handle.abort();
            }
        }
    }
}

/// Next `hour:00` UTC strictly after `now`.
pub fn next_daily_run(now: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
    let today = now
        .date_naive()
        .and_hms_opt(hour.min(23), 0, 0)
        .map(|t| t.and_utc());

    match today {
        Some(t) if t > now => t,
        Some(t) => t + ChronoDuration::days(1),
        None => now + ChronoDuration::days(1),
    }
}

fn until(at: DateTime<Utc>) -> Duration {
    (at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
}

fn log_failure<T>(job: &str, result: Result<T>) {
    if let Err(e) = result {
        error!("Job {} failed: {}", job, e);
    }
}

pub struct Scheduler {
    pipeline: Arc<Pipeline>,
}

impl Scheduler {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    /// Startup recovery, then the periodic jobs until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        if let Err(e) = self.pipeline.recover_on_startup().await {
            error!("Startup recovery failed: {}", e);
        }

        let schedule = self.pipeline.schedule().clone();
        let start = Instant::now();

        let mut fetch = interval_at(start + schedule.startup_delay, schedule.fetch_interval);
        let mut watchdog = interval_at(start + schedule.watchdog_interval, schedule.watchdog_interval);
        let mut retry = interval_at(start + schedule.retry_interval, schedule.retry_interval);
        for timer in [&mut fetch, &mut watchdog, &mut retry] {
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        }

        let mut next_purge = next_daily_run(Utc::now(), schedule.purge_hour);
        let purge_sleep = tokio::time::sleep(until(next_purge));
        tokio::pin!(purge_sleep);

        let mut fetch_job = JobSlot::new("fetch");
        let mut watchdog_job = JobSlot::new("watchdog");
        let mut retry_job = JobSlot::new("retry_failed");
        let mut purge_job = JobSlot::new("purge");

        info!(
            "Scheduler started: fetch every {:?}, watchdog every {:?}, retry every {:?}, purge next at {}",
            schedule.fetch_interval, schedule.watchdog_interval, schedule.retry_interval, next_purge
        );
        self.pipeline
            .activity()
            .info(ActivityCategory::System, "Scheduler started");

        loop {
            tokio::select! {
                _ = fetch.tick() => {
                    let pipeline = self.pipeline.clone();
                    fetch_job.trigger(async move {
                        log_failure("fetch", pipeline.ingest_and_summarise().await);
                    });
                }
                _ = watchdog.tick() => {
                    let pipeline = self.pipeline.clone();
                    watchdog_job.trigger(async move {
                        log_failure("watchdog", pipeline.watchdog().await);
                    });
                }
                _ = retry.tick() => {
                    let pipeline = self.pipeline.clone();
                    retry_job.trigger(async move {
                        log_failure("retry_failed", pipeline.retry_failed().await);
                    });
                }
                _ = &mut purge_sleep => {
                    let pipeline = self.pipeline.clone();
                    purge_job.trigger(async move {
                        log_failure("purge", pipeline.purge_expired().await);
                    });
                    next_purge = next_daily_run(Utc::now(), schedule.purge_hour);
                    debug!("Next purge at {}", next_purge);
                    purge_sleep.as_mut().reset(Instant::now() + until(next_purge));
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Scheduler shutting down");
        for job in [&mut fetch_job, &mut watchdog_job, &mut retry_job, &mut purge_job] {
            job.abort();
        }
        Ok(())
    }
}
