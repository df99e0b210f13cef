#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use interfaces::{
    Article, ArticleStatus, ArticleStore, NewArticle, PurgeReport, Source, SourceSpec,
    SourceType, StatusCounts, StoreError, StoreResult, SummaryOutcome,
};
use secfeed::llm_adapter::{InferenceBackend, InferenceError};
use secfeed::{
    ActivityLog, ContentExtractor, FeedFetcher, FeedIngester, MemoryStore, PageFetcher,
    Pipeline, PipelineError, ScheduleConfig, Summariser, SummariserConfig,
};
use tokio::sync::Notify;
use uuid::Uuid;

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub const PLAUSIBLE_SUMMARY: &str = "A ransomware group encrypted systems at a regional hospital, \
    forcing staff to divert ambulances and revert to paper records while investigators work \
    to determine how the attackers gained initial access and whether patient data was stolen.";

/// One `<item>` of a test feed.
pub struct Item<'a> {
    pub title: &'a str,
    pub link: Option<&'a str>,
    pub description: &'a str,
    pub published: Option<DateTime<Utc>>,
}

impl<'a> Item<'a> {
    pub fn new(title: &'a str, link: &'a str, description: &'a str) -> Self {
        Self {
            title,
            link: Some(link),
            description,
            published: None,
        }
    }

    pub fn published(mut self, at: DateTime<Utc>) -> Self {
        self.published = Some(at);
        self
    }

    pub fn without_link(mut self) -> Self {
        self.link = None;
        self
    }
}

pub fn rss(title: &str, items: &[Item<'_>]) -> Vec<u8> {
    let mut body = String::new();
    for item in items {
        body.push_str("<item>");
        body.push_str(&format!("<title>{}</title>", item.title));
        if let Some(link) = item.link {
            body.push_str(&format!("<link>{}</link>", link));
        }
        body.push_str(&format!("<description>{}</description>", item.description));
        if let Some(published) = item.published {
            body.push_str(&format!("<pubDate>{}</pubDate>", published.to_rfc2822()));
        }
        body.push_str("</item>");
    }

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel><title>{}</title><link>https://feed.example</link>
<description>Test feed</description>{}</channel></rss>"#,
        title, body
    )
    .into_bytes()
}

/// Serves canned feed documents; unknown urls answer 503.
#[derive(Default)]
pub struct StaticFeeds {
    documents: Mutex<HashMap<String, Vec<u8>>>,
}

impl StaticFeeds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: &str, body: Vec<u8>) {
        self.documents.lock().unwrap().insert(url.to_string(), body);
    }
}

#[async_trait]
impl FeedFetcher for StaticFeeds {
    async fn fetch_feed(&self, url: &str) -> secfeed::Result<Vec<u8>> {
        self.documents
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| PipelineError::HttpStatus {
                status: 503,
                url: url.to_string(),
            })
    }
}

/// Every page fetch fails, so extraction falls back to feed fields.
pub struct NoPages;

#[async_trait]
impl PageFetcher for NoPages {
    async fn fetch_page(&self, url: &str) -> secfeed::Result<String> {
        Err(PipelineError::HttpStatus {
            status: 404,
            url: url.to_string(),
        })
    }
}

/// Replays queued responses, then repeats the fallback.
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Result<String, InferenceError>>>,
    fallback: String,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn always(response: &str) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: response.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn then(self, response: Result<String, InferenceError>) -> Self {
        self.script.lock().unwrap().push_back(response);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, _prompt: &str, _timeout: Duration) -> Result<String, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().unwrap().pop_front() {
            Some(response) => response,
            None => Ok(self.fallback.clone()),
        }
    }
}

/// Blocks every call until released, announcing each arrival.
pub struct GatedBackend {
    pub started: Notify,
    pub release: Notify,
    calls: AtomicUsize,
}

impl GatedBackend {
    pub fn new() -> Self {
        Self {
            started: Notify::new(),
            release: Notify::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceBackend for GatedBackend {
    fn name(&self) -> &str {
        "gated"
    }

    async fn generate(&self, _prompt: &str, _timeout: Duration) -> Result<String, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        self.release.notified().await;
        Ok(PLAUSIBLE_SUMMARY.to_string())
    }
}

/// Sleeps on every call and records the peak number of concurrent calls.
pub struct PeakBackend {
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl PeakBackend {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceBackend for PeakBackend {
    fn name(&self) -> &str {
        "peak"
    }

    async fn generate(&self, _prompt: &str, _timeout: Duration) -> Result<String, InferenceError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(PLAUSIBLE_SUMMARY.to_string())
    }
}

/// Delegates to a [`MemoryStore`] but refuses to commit the outcome of one article.
pub struct FailingCommitStore {
    inner: Arc<MemoryStore>,
    poisoned: Uuid,
}

impl FailingCommitStore {
    pub fn new(inner: Arc<MemoryStore>, poisoned: Uuid) -> Self {
        Self { inner, poisoned }
    }
}

#[async_trait]
impl ArticleStore for FailingCommitStore {
    async fn active_sources(&self, source_type: SourceType) -> StoreResult<Vec<Source>> {
        self.inner.active_sources(source_type).await
    }

    async fn source_count(&self) -> StoreResult<u64> {
        self.inner.source_count().await
    }

    async fn add_sources(&self, specs: &[SourceSpec]) -> StoreResult<u64> {
        self.inner.add_sources(specs).await
    }

    async fn record_source_success(
        &self,
        source_id: Uuid,
        added: u64,
        fetched_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.inner.record_source_success(source_id, added, fetched_at).await
    }

    async fn record_source_failure(&self, source_id: Uuid) -> StoreResult<()> {
        self.inner.record_source_failure(source_id).await
    }

    async fn url_hash_exists(&self, url_hash: &str) -> StoreResult<bool> {
        self.inner.url_hash_exists(url_hash).await
    }

    async fn insert_articles(
        &self,
        articles: Vec<NewArticle>,
        fetched_at: DateTime<Utc>,
    ) -> StoreResult<u64> {
        self.inner.insert_articles(articles, fetched_at).await
    }

    async fn get_article(&self, id: Uuid) -> StoreResult<Option<Article>> {
        self.inner.get_article(id).await
    }

    async fn claim_pending(&self, claimed_at: DateTime<Utc>) -> StoreResult<Vec<Article>> {
        self.inner.claim_pending(claimed_at).await
    }

    async fn finish_article(&self, id: Uuid, outcome: &SummaryOutcome) -> StoreResult<()> {
        if id == self.poisoned {
            return Err(StoreError::Backend("connection reset during commit".into()));
        }
        self.inner.finish_article(id, outcome).await
    }

    async fn requeue_processing(
        &self,
        claimed_before: Option<DateTime<Utc>>,
    ) -> StoreResult<u64> {
        self.inner.requeue_processing(claimed_before).await
    }

    async fn requeue_failed(&self) -> StoreResult<u64> {
        self.inner.requeue_failed().await
    }

    async fn requeue_article(&self, id: Uuid) -> StoreResult<bool> {
        self.inner.requeue_article(id).await
    }

    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> StoreResult<PurgeReport> {
        self.inner.purge_expired(cutoff).await
    }

    async fn status_counts(&self) -> StoreResult<StatusCounts> {
        self.inner.status_counts().await
    }
}

pub fn fast_summariser_config() -> SummariserConfig {
    SummariserConfig {
        concurrency: 3,
        call_timeout: Duration::from_secs(5),
        retry_delay: Duration::from_millis(10),
    }
}

pub fn rss_source(name: &str, url: &str) -> SourceSpec {
    SourceSpec {
        name: name.to_string(),
        url: url.to_string(),
        category: "general".to_string(),
        source_type: SourceType::Rss,
        rate_limit_seconds: 60,
        is_active: true,
    }
}

/// An article row in a given state, for seeding the store directly.
pub fn article(url: &str, category: &str, status: ArticleStatus, fetched_at: DateTime<Utc>) -> Article {
    Article {
        id: Uuid::new_v4(),
        url: url.to_string(),
        url_hash: secfeed::dedup::url_hash(url),
        title: format!("Article at {}", url),
        source_name: "Test Feed".to_string(),
        category: category.to_string(),
        published_at: None,
        fetched_at,
        raw_content: Some("Some body text for the article.".to_string()),
        summary: (status == ArticleStatus::Done).then(|| "An existing summary.".to_string()),
        status,
        image_url: None,
        is_active: true,
        is_featured: false,
        claimed_at: None,
    }
}

/// Everything a test needs, wired over the in-memory store.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub feeds: Arc<StaticFeeds>,
    pub activity: Arc<ActivityLog>,
    pub pipeline: Pipeline,
}

impl Harness {
    pub fn new(backend: Arc<dyn InferenceBackend>) -> Self {
        Self::with_schedule(backend, ScheduleConfig::default())
    }

    pub fn with_schedule(backend: Arc<dyn InferenceBackend>, schedule: ScheduleConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::build(backend, schedule, store.clone(), store)
    }

    /// The pipeline talks to `pipeline_store`; `store` stays the backing rows.
    pub fn over_store(
        backend: Arc<dyn InferenceBackend>,
        store: Arc<MemoryStore>,
        pipeline_store: Arc<dyn ArticleStore>,
    ) -> Self {
        Self::build(backend, ScheduleConfig::default(), store, pipeline_store)
    }

    fn build(
        backend: Arc<dyn InferenceBackend>,
        schedule: ScheduleConfig,
        store: Arc<MemoryStore>,
        pipeline_store: Arc<dyn ArticleStore>,
    ) -> Self {
        init_tracing();

        let feeds = Arc::new(StaticFeeds::new());
        let activity = Arc::new(ActivityLog::default());

        let extractor = ContentExtractor::new(Arc::new(NoPages))
            .with_page_timeout(Duration::from_millis(200));
        let ingester = FeedIngester::new(
            pipeline_store.clone(),
            feeds.clone(),
            extractor,
            activity.clone(),
            3,
        );
        let summariser = Summariser::new(
            pipeline_store.clone(),
            backend,
            activity.clone(),
            fast_summariser_config(),
        );
        let pipeline = Pipeline::new(pipeline_store, ingester, summariser, activity.clone(), schedule);

        Self {
            store,
            feeds,
            activity,
            pipeline,
        }
    }

    pub async fn add_source(&self, name: &str, url: &str) -> Uuid {
        self.store.add_sources(&[rss_source(name, url)]).await.unwrap();
        self.store
            .sources()
            .await
            .into_iter()
            .find(|s| s.url == url)
            .map(|s| s.id)
            .unwrap()
    }

    pub fn activity_messages(&self) -> Vec<String> {
        self.activity
            .recent(usize::MAX)
            .into_iter()
            .map(|e| e.message)
            .collect()
    }
}
