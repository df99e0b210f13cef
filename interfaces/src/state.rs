use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::defs::{
    Article, ArticleStatus, NewArticle, PurgeReport, Source, SourceSpec, SourceType,
    StatusCounts, SummaryOutcome,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("article not found: {id}")]
    ArticleNotFound { id: Uuid },

    #[error("source not found: {id}")]
    SourceNotFound { id: Uuid },

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::Backend(Box::new(err))
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Transactional store shared by ingestion, summarisation and the periodic jobs.
///
/// Every method is one short unit of work committed before it returns. Batch
/// mutations are filtered by status/age so concurrent jobs only ever overlap
/// idempotently.
#[async_trait]
pub trait ArticleStore: Send + Sync {
    async fn active_sources(&self, source_type: SourceType) -> StoreResult<Vec<Source>>;

    async fn source_count(&self) -> StoreResult<u64>;

    /// Insert sources, ignoring urls that already exist. Returns rows added.
    async fn add_sources(&self, specs: &[SourceSpec]) -> StoreResult<u64>;

    async fn record_source_success(
        &self,
        source_id: Uuid,
        added: u64,
        fetched_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    async fn record_source_failure(&self, source_id: Uuid) -> StoreResult<()>;

    async fn url_hash_exists(&self, url_hash: &str) -> StoreResult<bool>;

    /// Insert one source's new articles as a single unit, all `pending`.
    /// Rows whose `url_hash` or `url` already exists are skipped. Returns rows added.
    async fn insert_articles(
        &self,
        articles: Vec<NewArticle>,
        fetched_at: DateTime<Utc>,
    ) -> StoreResult<u64>;

    async fn get_article(&self, id: Uuid) -> StoreResult<Option<Article>>;

    /// Atomically move every `pending` article to `processing`, stamping
    /// `claimed_at`, and return them oldest `fetched_at` first.
    async fn claim_pending(&self, claimed_at: DateTime<Utc>) -> StoreResult<Vec<Article>>;

    /// Write the final state of one claimed article.
    async fn finish_article(&self, id: Uuid, outcome: &SummaryOutcome) -> StoreResult<()>;

    /// `processing` -> `pending` for rows claimed before `claimed_before`
    /// (or all of them when `None`). Returns rows changed.
    async fn requeue_processing(
        &self,
        claimed_before: Option<DateTime<Utc>>,
    ) -> StoreResult<u64>;

    /// `failed` -> `pending` for every failed row. Returns rows changed.
    async fn requeue_failed(&self) -> StoreResult<u64>;

    /// Manual retry / re-summarise of a single `done` or `failed` article.
    /// Also makes it visible again. Returns false when nothing changed.
    async fn requeue_article(&self, id: Uuid) -> StoreResult<bool>;

    /// Delete articles fetched before `cutoff`, keeping expired `done` rows of
    /// categories with no `done` row at or after `cutoff`.
    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> StoreResult<PurgeReport>;

    async fn status_counts(&self) -> StoreResult<StatusCounts>;
}

/// Statuses the manual requeue accepts.
pub const REQUEUEABLE: [ArticleStatus; 2] = [ArticleStatus::Done, ArticleStatus::Failed];
