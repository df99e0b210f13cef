use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use interfaces::{ArticleStore, NewArticle, Source, SourceType};
use tracing::{debug, error, info, warn};

use crate::activity::{ActivityCategory, ActivityLog};
use crate::categoriser::categorise;
use crate::dedup::{is_duplicate, url_hash};
use crate::extractor::ContentExtractor;
use crate::fetcher::FeedFetcher;
use crate::parser::parse_feed_blocking;
use crate::types::{days_before, IngestStats, ParsedEntry, Result};

pub const UNTITLED: &str = "Untitled";

/// Why an entry was not turned into an article.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Skip {
    NoLink,
    TooOld,
    Duplicate,
}

/// What one source contributed to a pass.
#[derive(Debug, Default)]
struct SourcePass {
    added: u64,
    skipped: u64,
}

pub struct FeedIngester {
    store: Arc<dyn ArticleStore>,
    feeds: Arc<dyn FeedFetcher>,
    extractor: ContentExtractor,
    activity: Arc<ActivityLog>,
    backfill_days: i64,
}

impl FeedIngester {
    pub fn new(
        store: Arc<dyn ArticleStore>,
        feeds: Arc<dyn FeedFetcher>,
        extractor: ContentExtractor,
        activity: Arc<ActivityLog>,
        backfill_days: i64,
    ) -> Self {
        Self {
            store,
            feeds,
            extractor,
            activity,
            backfill_days,
        }
    }

    /// One pass over every active RSS source. A failing source is recorded
    /// and skipped; it never aborts the pass.
    pub async fn ingest_all(&self) -> Result<IngestStats> {
        let sources = self.store.active_sources(SourceType::Rss).await?;
        // An unrepresentable window admits every entry.
        let cutoff =
            days_before(Utc::now(), self.backfill_days).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut stats = IngestStats::default();

        info!("Ingesting {} active sources", sources.len());

        for source in &sources {
            self.activity
                .info(ActivityCategory::Fetch, format!("Fetching: {}", source.name));

            match self.ingest_source(source, cutoff).await {
                Ok(pass) => {
                    stats.feeds_processed += 1;
                    stats.articles_added += pass.added;
                    stats.articles_skipped += pass.skipped;

                    if pass.added > 0 {
                        let noun = if pass.added == 1 { "article" } else { "articles" };
                        self.activity.success(
                            ActivityCategory::Fetch,
                            format!("{}: {} new {}", source.name, pass.added, noun),
                        );
                    }
                }
                Err(e) => {
                    stats.errors += 1;
                    error!("Feed error for {} ({}): {}", source.name, source.url, e);
                    self.activity.error(
                        ActivityCategory::Fetch,
                        format!("Feed error: {} — {}", source.name, e),
                    );
                    if let Err(e) = self.store.record_source_failure(source.id).await {
                        error!("Failed to record failure for {}: {}", source.name, e);
                    }
                }
            }
        }

        info!(
            "Ingestion complete: {} feeds, {} added, {} skipped, {} errors",
            stats.feeds_processed, stats.articles_added, stats.articles_skipped, stats.errors
        );
        Ok(stats)
    }

    async fn ingest_source(&self, source: &Source, cutoff: DateTime<Utc>) -> Result<SourcePass> {
        let body = self.feeds.fetch_feed(&source.url).await?;
        let feed = parse_feed_blocking(body).await?;

        debug!("{}: {} entries", source.name, feed.entries.len());

        let mut pass = SourcePass::default();
        let mut batch = Vec::new();
        let mut seen = HashSet::new();

        for entry in &feed.entries {
            match self.prepare(source, entry, cutoff, &mut seen).await {
                Ok(Ok(article)) => batch.push(article),
                Ok(Err(reason)) => {
                    debug!("{}: skipped entry ({:?})", source.name, reason);
                    pass.skipped += 1;
                }
                Err(e) => {
                    warn!("Error processing entry from {}: {}", source.name, e);
                    pass.skipped += 1;
                }
            }
        }

        let candidates = batch.len() as u64;
        let fetched_at = Utc::now();
        pass.added = self.store.insert_articles(batch, fetched_at).await?;
        // Rows that lost a race with another writer count as skipped.
        pass.skipped += candidates.saturating_sub(pass.added);

        self.store
            .record_source_success(source.id, pass.added, fetched_at)
            .await?;

        Ok(pass)
    }

    /// Turn one feed entry into a pending article, or say why not.
    async fn prepare(
        &self,
        source: &Source,
        entry: &ParsedEntry,
        cutoff: DateTime<Utc>,
        seen: &mut HashSet<String>,
    ) -> Result<std::result::Result<NewArticle, Skip>> {
        let Some(link) = entry.link.as_deref().map(str::trim).filter(|l| !l.is_empty()) else {
            return Ok(Err(Skip::NoLink));
        };

        if entry.published_at.is_some_and(|published| published < cutoff) {
            return Ok(Err(Skip::TooOld));
        }

        let hash = url_hash(link);
        if seen.contains(&hash) || is_duplicate(self.store.as_ref(), &hash).await? {
            return Ok(Err(Skip::Duplicate));
        }
        seen.insert(hash.clone());

        let title = entry
            .title
            .clone()
            .unwrap_or_else(|| UNTITLED.to_string());

        let extracted = self.extractor.extract(link, entry, &source.name).await;
        let category = categorise(&title, &extracted.content);

        Ok(Ok(NewArticle {
            url: link.to_string(),
            url_hash: hash,
            title,
            source_name: source.name.clone(),
            category: category.to_string(),
            published_at: entry.published_at,
            raw_content: Some(extracted.content),
            image_url: extracted.image_url,
        }))
    }
}
