use chrono::{DateTime, Utc};
use interfaces::StoreError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub max_feed_size_mb: usize,
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "secfeed/0.1 (+security news aggregator)".to_string(),
            timeout_seconds: 30,
            max_retries: 2,
            retry_delay_seconds: 2,
            max_feed_size_mb: 10,
            max_redirects: 5,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub entries: Vec<ParsedEntry>,
}

/// One syndication entry, reduced to the fields ingestion and extraction read.
#[derive(Debug, Clone, Default)]
pub struct ParsedEntry {
    pub link: Option<String>,
    pub title: Option<String>,
    /// Full `<content>` / `content:encoded` body, usually HTML.
    pub content: Option<String>,
    /// `<summary>` / `<description>`.
    pub summary: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub feed_title: Option<String>,
}

/// Counters returned by one ingestion pass over every active source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStats {
    pub feeds_processed: u64,
    pub articles_added: u64,
    pub articles_skipped: u64,
    pub errors: u64,
}

/// Counters returned by one summarisation batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    pub processed: u64,
    /// Includes hidden marketing items.
    pub done: u64,
    pub hidden: u64,
    pub failed: u64,
    /// Another batch held the guard; nothing was claimed.
    pub skipped: bool,
}

impl BatchStats {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Feed parse error: {0}")]
    Parse(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Response too large: {size_mb}MB from {url}")]
    TooLarge { size_mb: usize, url: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// `now - days`, or `None` when the window is not representable.
pub fn days_before(now: DateTime<Utc>, days: i64) -> Option<DateTime<Utc>> {
    chrono::Duration::try_days(days).and_then(|window| now.checked_sub_signed(window))
}
