use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use interfaces::{
    Article, ArticleStatus, ArticleStore, NewArticle, PurgeReport, Source, SourceSpec,
    SourceType, StatusCounts, StoreError, StoreResult, SummaryOutcome,
};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    sources: Vec<Source>,
    articles: Vec<Article>,
}

/// In-process store with the same semantics as the Postgres schema.
///
/// Each call holds the lock for its whole body, which stands in for a single
/// transaction.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn articles(&self) -> Vec<Article> {
        self.tables.lock().await.articles.clone()
    }

    pub async fn sources(&self) -> Vec<Source> {
        self.tables.lock().await.sources.clone()
    }

    /// Insert a fully formed row, bypassing ingestion.
    pub async fn put_article(&self, article: Article) {
        let mut tables = self.tables.lock().await;
        tables.articles.retain(|a| a.id != article.id);
        tables.articles.push(article);
    }

    pub async fn put_source(&self, source: Source) {
        let mut tables = self.tables.lock().await;
        tables.sources.retain(|s| s.id != source.id);
        tables.sources.push(source);
    }
}

#[async_trait]
impl ArticleStore for MemoryStore {
    async fn active_sources(&self, source_type: SourceType) -> StoreResult<Vec<Source>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .sources
            .iter()
            .filter(|s| s.is_active && s.source_type == source_type)
            .cloned()
            .collect())
    }

    async fn source_count(&self) -> StoreResult<u64> {
        Ok(self.tables.lock().await.sources.len() as u64)
    }

    async fn add_sources(&self, specs: &[SourceSpec]) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        let mut added = 0;
        for spec in specs {
            if tables.sources.iter().any(|s| s.url == spec.url) {
                continue;
            }
            tables.sources.push(Source::from(spec.clone()));
            added += 1;
        }
        Ok(added)
    }

    async fn record_source_success(
        &self,
        source_id: Uuid,
        added: u64,
        fetched_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let source = tables
            .sources
            .iter_mut()
            .find(|s| s.id == source_id)
            .ok_or(StoreError::SourceNotFound { id: source_id })?;
        source.last_fetched_at = Some(fetched_at);
        source.article_count += added;
        source.consecutive_failures = 0;
        Ok(())
    }

    async fn record_source_failure(&self, source_id: Uuid) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let source = tables
            .sources
            .iter_mut()
            .find(|s| s.id == source_id)
            .ok_or(StoreError::SourceNotFound { id: source_id })?;
        source.consecutive_failures += 1;
        Ok(())
    }

    async fn url_hash_exists(&self, url_hash: &str) -> StoreResult<bool> {
        let tables = self.tables.lock().await;
        Ok(tables.articles.iter().any(|a| a.url_hash == url_hash))
    }

    async fn insert_articles(
        &self,
        articles: Vec<NewArticle>,
        fetched_at: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        let mut hashes: HashSet<String> =
            tables.articles.iter().map(|a| a.url_hash.clone()).collect();
        let mut urls: HashSet<String> = tables.articles.iter().map(|a| a.url.clone()).collect();

        let mut added = 0;
        for article in articles {
            if hashes.contains(&article.url_hash) || urls.contains(&article.url) {
                continue;
            }
            hashes.insert(article.url_hash.clone());
            urls.insert(article.url.clone());
            tables.articles.push(article.into_article(fetched_at));
            added += 1;
        }
        Ok(added)
    }

    async fn get_article(&self, id: Uuid) -> StoreResult<Option<Article>> {
        let tables = self.tables.lock().await;
        Ok(tables.articles.iter().find(|a| a.id == id).cloned())
    }

    async fn claim_pending(&self, claimed_at: DateTime<Utc>) -> StoreResult<Vec<Article>> {
        let mut tables = self.tables.lock().await;
        let mut claimed = Vec::new();
        for article in tables
            .articles
            .iter_mut()
            .filter(|a| a.status == ArticleStatus::Pending)
        {
            article.status = ArticleStatus::Processing;
            article.claimed_at = Some(claimed_at);
            claimed.push(article.clone());
        }
        claimed.sort_by_key(|a| a.fetched_at);
        Ok(claimed)
    }

    async fn finish_article(&self, id: Uuid, outcome: &SummaryOutcome) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let article = tables
            .articles
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(StoreError::ArticleNotFound { id })?;

        match outcome {
            SummaryOutcome::Summarised(summary) => {
                article.summary = Some(summary.clone());
                article.status = ArticleStatus::Done;
            }
            SummaryOutcome::Hidden => {
                article.summary = None;
                article.status = ArticleStatus::Done;
                article.is_active = false;
            }
            SummaryOutcome::Failed => {
                article.status = ArticleStatus::Failed;
            }
        }
        Ok(())
    }

    async fn requeue_processing(
        &self,
        claimed_before: Option<DateTime<Utc>>,
    ) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        let mut changed = 0;
        for article in tables
            .articles
            .iter_mut()
            .filter(|a| a.status == ArticleStatus::Processing)
        {
            let stuck = match (claimed_before, article.claimed_at) {
                (None, _) | (Some(_), None) => true,
                (Some(cutoff), Some(claimed)) => claimed < cutoff,
            };
            if stuck {
                article.status = ArticleStatus::Pending;
                article.claimed_at = None;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn requeue_failed(&self) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        let mut changed = 0;
        for article in tables
            .articles
            .iter_mut()
            .filter(|a| a.status == ArticleStatus::Failed)
        {
            article.status = ArticleStatus::Pending;
            article.claimed_at = None;
            changed += 1;
        }
        Ok(changed)
    }

    async fn requeue_article(&self, id: Uuid) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        let Some(article) = tables
            .articles
            .iter_mut()
            .find(|a| a.id == id && interfaces::state::REQUEUEABLE.contains(&a.status))
        else {
            return Ok(false);
        };
        article.status = ArticleStatus::Pending;
        article.claimed_at = None;
        article.is_active = true;
        Ok(true)
    }

    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> StoreResult<PurgeReport> {
        let mut tables = self.tables.lock().await;

        let safe: HashSet<String> = tables
            .articles
            .iter()
            .filter(|a| a.status == ArticleStatus::Done && a.fetched_at >= cutoff)
            .map(|a| a.category.clone())
            .collect();

        let mut report = PurgeReport::default();
        let mut protected = HashSet::new();

        tables.articles.retain(|a| {
            if a.fetched_at >= cutoff {
                return true;
            }
            if a.status != ArticleStatus::Done {
                report.removed_unsummarised += 1;
                return false;
            }
            if safe.contains(&a.category) {
                report.removed_done += 1;
                return false;
            }
            protected.insert(a.category.clone());
            true
        });

        let mut protected: Vec<String> = protected.into_iter().collect();
        protected.sort();
        report.protected_categories = protected;
        Ok(report)
    }

    async fn status_counts(&self) -> StoreResult<StatusCounts> {
        let tables = self.tables.lock().await;
        let mut counts = StatusCounts::default();
        for article in &tables.articles {
            counts.add(article.status, 1);
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_article(url: &str, category: &str) -> NewArticle {
        NewArticle {
            url: url.to_string(),
            url_hash: crate::dedup::url_hash(url),
            title: format!("Title for {url}"),
            source_name: "Test".to_string(),
            category: category.to_string(),
            published_at: None,
            raw_content: Some("body".to_string()),
            image_url: None,
        }
    }

    #[tokio::test]
    async fn insert_skips_existing_hashes() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let added = store
            .insert_articles(
                vec![
                    new_article("https://x.com/a", "general"),
                    new_article("HTTPS://X.COM/A ", "general"),
                ],
                now,
            )
            .await
            .unwrap();
        assert_eq!(added, 1);

        let again = store
            .insert_articles(vec![new_article("https://x.com/a", "general")], now)
            .await
            .unwrap();
        assert_eq!(again, 0);
        assert_eq!(store.articles().await.len(), 1);
    }

    #[tokio::test]
    async fn claim_moves_all_pending_oldest_first() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .insert_articles(vec![new_article("https://x.com/new", "general")], now)
            .await
            .unwrap();
        store
            .insert_articles(
                vec![new_article("https://x.com/old", "general")],
                now - Duration::hours(1),
            )
            .await
            .unwrap();

        let claimed = store.claim_pending(now).await.unwrap();
        assert_eq!(claimed.len(), 2);
        assert_eq!(claimed[0].url, "https://x.com/old");
        assert!(claimed.iter().all(|a| a.status == ArticleStatus::Processing));

        let counts = store.status_counts().await.unwrap();
        assert_eq!(counts.pending, 0);
        assert_eq!(counts.processing, 2);
    }

    #[tokio::test]
    async fn requeue_article_only_from_done_or_failed() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .insert_articles(vec![new_article("https://x.com/a", "general")], now)
            .await
            .unwrap();
        let id = store.articles().await[0].id;

        assert!(!store.requeue_article(id).await.unwrap());

        store.claim_pending(now).await.unwrap();
        store.finish_article(id, &SummaryOutcome::Hidden).await.unwrap();
        assert!(store.requeue_article(id).await.unwrap());

        let article = store.get_article(id).await.unwrap().unwrap();
        assert_eq!(article.status, ArticleStatus::Pending);
        assert!(article.is_active);
    }

    #[tokio::test]
    async fn source_bookkeeping() {
        let store = MemoryStore::new();
        let spec = SourceSpec {
            name: "Feed".into(),
            url: "https://feed.example/rss".into(),
            category: "general".into(),
            source_type: SourceType::Rss,
            rate_limit_seconds: 60,
            is_active: true,
        };
        assert_eq!(store.add_sources(&[spec.clone(), spec]).await.unwrap(), 1);
        let id = store.sources().await[0].id;

        store.record_source_failure(id).await.unwrap();
        store.record_source_failure(id).await.unwrap();
        assert_eq!(store.sources().await[0].consecutive_failures, 2);

        store.record_source_success(id, 3, Utc::now()).await.unwrap();
        let source = &store.sources().await[0];
        assert_eq!(source.consecutive_failures, 0);
        assert_eq!(source.article_count, 3);
        assert!(source.last_fetched_at.is_some());
    }
}
