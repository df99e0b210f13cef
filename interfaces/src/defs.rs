use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of an article's summary.
///
/// pending -> processing -> done | failed
/// failed -> pending (auto or manual retry)
/// processing -> pending (watchdog, startup recovery)
/// done -> pending (manual re-summarise)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArticleStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl ArticleStatus {
    pub const ALL: [ArticleStatus; 4] = [
        ArticleStatus::Pending,
        ArticleStatus::Processing,
        ArticleStatus::Done,
        ArticleStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArticleStatus::Pending => "pending",
            ArticleStatus::Processing => "processing",
            ArticleStatus::Done => "done",
            ArticleStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ArticleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArticleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ArticleStatus::Pending),
            "processing" => Ok(ArticleStatus::Processing),
            "done" => Ok(ArticleStatus::Done),
            "failed" => Ok(ArticleStatus::Failed),
            other => Err(format!("unknown article status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: Uuid,
    pub url: String,
    pub url_hash: String,
    pub title: String,
    pub source_name: String,
    pub category: String,
    pub published_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
    pub raw_content: Option<String>,
    pub summary: Option<String>,
    pub status: ArticleStatus,
    pub image_url: Option<String>,
    pub is_active: bool,
    pub is_featured: bool,
    /// Set when the summariser claims the row; the watchdog measures stuck time from here.
    pub claimed_at: Option<DateTime<Utc>>,
}

/// An article as produced by ingestion, before the store assigns identity.
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub url: String,
    pub url_hash: String,
    pub title: String,
    pub source_name: String,
    pub category: String,
    pub published_at: Option<DateTime<Utc>>,
    pub raw_content: Option<String>,
    pub image_url: Option<String>,
}

impl NewArticle {
    /// Materialise as a freshly fetched, pending, visible article.
    pub fn into_article(self, fetched_at: DateTime<Utc>) -> Article {
        Article {
            id: Uuid::new_v4(),
            url: self.url,
            url_hash: self.url_hash,
            title: self.title,
            source_name: self.source_name,
            category: self.category,
            published_at: self.published_at,
            fetched_at,
            raw_content: self.raw_content,
            summary: None,
            status: ArticleStatus::Pending,
            image_url: self.image_url,
            is_active: true,
            is_featured: false,
            claimed_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Rss,
    Scrape,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Rss => "rss",
            SourceType::Scrape => "scrape",
        }
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rss" => Ok(SourceType::Rss),
            "scrape" => Ok(SourceType::Scrape),
            other => Err(format!("unknown source type: {other}")),
        }
    }
}

/// Source configuration as managed outside the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSpec {
    pub name: String,
    pub url: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(rename = "type", default = "default_source_type")]
    pub source_type: SourceType,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_seconds: u32,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_category() -> String {
    "general".to_string()
}

fn default_source_type() -> SourceType {
    SourceType::Rss
}

fn default_rate_limit() -> u32 {
    60
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub category: String,
    pub source_type: SourceType,
    pub rate_limit_seconds: u32,
    pub is_active: bool,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub article_count: u64,
}

impl From<SourceSpec> for Source {
    fn from(spec: SourceSpec) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: spec.name,
            url: spec.url,
            category: spec.category,
            source_type: spec.source_type,
            rate_limit_seconds: spec.rate_limit_seconds,
            is_active: spec.is_active,
            last_fetched_at: None,
            consecutive_failures: 0,
            article_count: 0,
        }
    }
}

/// Final state written for one summarised article.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryOutcome {
    Summarised(String),
    /// Marketing-only content: done, no summary, hidden.
    Hidden,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub processing: u64,
    pub done: u64,
    pub failed: u64,
}

impl StatusCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.done + self.failed
    }

    pub fn add(&mut self, status: ArticleStatus, n: u64) {
        match status {
            ArticleStatus::Pending => self.pending += n,
            ArticleStatus::Processing => self.processing += n,
            ArticleStatus::Done => self.done += n,
            ArticleStatus::Failed => self.failed += n,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeReport {
    /// Expired pending/processing/failed rows.
    pub removed_unsummarised: u64,
    /// Expired done rows in categories that still have recent done rows.
    pub removed_done: u64,
    /// Categories whose expired done rows were kept.
    pub protected_categories: Vec<String>,
}

impl PurgeReport {
    pub fn total(&self) -> u64 {
        self.removed_unsummarised + self.removed_done
    }
}
