//! Summarisation engine: claims pending articles and drives them through the
//! inference backend under bounded concurrency.
//!
//! Lifecycle: `pending -> processing -> done | failed`. Failed rows go back to
//! `pending` through the retry job or [`Summariser::requeue_article`]; rows
//! stuck in `processing` are reclaimed by the watchdog.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use interfaces::{Article, ArticleStore, StatusCounts, SummaryOutcome};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::activity::{ActivityCategory, ActivityLog};
use crate::extractor::truncate_chars;
use crate::llm_adapter::{InferenceBackend, InferenceError};
use crate::types::{BatchStats, Result};

pub const MARKETING_ONLY_TOKEN: &str = "MARKETING_ONLY";
/// Content with fewer words than this is treated as a bare title.
pub const SHORT_CONTENT_WORDS: usize = 30;
pub const PROMPT_CONTENT_CHARS: usize = 2000;
pub const TITLE_SNIPPET_CHARS: usize = 60;

#[derive(Debug, Clone)]
pub struct SummariserConfig {
    pub concurrency: usize,
    pub call_timeout: Duration,
    pub retry_delay: Duration,
}

impl Default for SummariserConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            call_timeout: Duration::from_secs(120),
            retry_delay: Duration::from_secs(5),
        }
    }
}

pub fn build_prompt(content: &str) -> String {
    let text = truncate_chars(content, PROMPT_CONTENT_CHARS);

    if text.split_whitespace().count() < SHORT_CONTENT_WORDS {
        format!(
            "You are a cybersecurity analyst.\n\
             If this is a product announcement, vendor feature, or marketing content \
             with no real threat or vulnerability, reply with exactly: {MARKETING_ONLY_TOKEN}\n\
             Otherwise write a 100-word summary: what happened, what threat or \
             vulnerability is involved, who is affected, and why it matters. \
             Plain English, no bullets, no headers.\n\n\
             Title: {text}\n\n\
             Summary:"
        )
    } else {
        format!(
            "You are a cybersecurity analyst.\n\n\
             FIRST: If this article is a product announcement, vendor feature launch, \
             platform pitch, or marketing copy with no actual threat, attack, or \
             vulnerability, reply with exactly: {MARKETING_ONLY_TOKEN}\n\n\
             OTHERWISE: Write a 100-word summary covering the threat, attack technique, \
             vulnerability, breach, or malware. Keep researcher or org attributions. \
             Do NOT mention products, pricing, features, or calls to action. \
             Plain English, no bullets.\n\n\
             Article: {text}\n\n\
             Summary:"
        )
    }
}

/// True when the backend flagged the article as marketing copy.
pub fn is_marketing_only(response: &str) -> bool {
    let cleaned = response
        .trim()
        .trim_start_matches(|c: char| matches!(c, '"' | '\'' | '*' | '`'));
    cleaned
        .get(..MARKETING_ONLY_TOKEN.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(MARKETING_ONLY_TOKEN))
}

pub fn title_snippet(title: &str) -> String {
    truncate_chars(title, TITLE_SNIPPET_CHARS)
}

pub struct Summariser {
    store: Arc<dyn ArticleStore>,
    backend: Arc<dyn InferenceBackend>,
    activity: Arc<ActivityLog>,
    config: SummariserConfig,
    running: Arc<Mutex<()>>,
}

impl Summariser {
    pub fn new(
        store: Arc<dyn ArticleStore>,
        backend: Arc<dyn InferenceBackend>,
        activity: Arc<ActivityLog>,
        config: SummariserConfig,
    ) -> Self {
        Self {
            store,
            backend,
            activity,
            config,
            running: Arc::new(Mutex::new(())),
        }
    }

    /// Share an existing guard, e.g. between two engines over the same store.
    pub fn with_guard(mut self, guard: Arc<Mutex<()>>) -> Self {
        self.running = guard;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }

    /// Claim every pending article and summarise it. Returns immediately with
    /// a skipped result when another batch holds the guard.
    pub async fn run_batch(&self) -> Result<BatchStats> {
        let Ok(_guard) = self.running.try_lock() else {
            debug!("Summarisation already running, skipping trigger");
            return Ok(BatchStats::skipped());
        };

        let claimed = self.store.claim_pending(Utc::now()).await?;
        if claimed.is_empty() {
            debug!("No pending articles to summarise");
            return Ok(BatchStats::default());
        }

        let total = claimed.len();
        info!("Starting summarisation: {} articles queued", total);

        let outcomes: Vec<SummaryOutcome> = stream::iter(claimed)
            .map(|article| self.process_one(article))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut stats = BatchStats {
            processed: total as u64,
            ..BatchStats::default()
        };
        for outcome in &outcomes {
            match outcome {
                SummaryOutcome::Summarised(_) => stats.done += 1,
                SummaryOutcome::Hidden => {
                    stats.done += 1;
                    stats.hidden += 1;
                }
                SummaryOutcome::Failed => stats.failed += 1,
            }
        }

        info!(
            "Summarisation complete: {} done ({} hidden), {} failed of {} total",
            stats.done, stats.hidden, stats.failed, total
        );
        Ok(stats)
    }

    async fn process_one(&self, article: Article) -> SummaryOutcome {
        let content = article
            .raw_content
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(&article.title);
        let prompt = build_prompt(content);
        let snippet = title_snippet(&article.title);

        let outcome = match self.generate_with_retry(&prompt, article.id).await {
            Ok(text) if is_marketing_only(&text) => {
                info!("Hid marketing article: {}", snippet);
                self.activity
                    .info(ActivityCategory::Summarise, format!("Hidden (marketing): {}", snippet));
                SummaryOutcome::Hidden
            }
            Ok(text) => {
                info!("Summarised: {}", snippet);
                self.activity
                    .success(ActivityCategory::Summarise, format!("Summarised: {}", snippet));
                SummaryOutcome::Summarised(text)
            }
            Err(e) => {
                error!(article_id = %article.id, "Summarisation failed: {}", e);
                self.activity
                    .error(ActivityCategory::Summarise, format!("Failed: {} — {}", snippet, e));
                SummaryOutcome::Failed
            }
        };

        // A failed write leaves the row in `processing` for the watchdog.
        if let Err(e) = self.store.finish_article(article.id, &outcome).await {
            error!(article_id = %article.id, "Failed to commit summary outcome: {}", e);
        }

        outcome
    }

    async fn generate_with_retry(
        &self,
        prompt: &str,
        article_id: Uuid,
    ) -> std::result::Result<String, InferenceError> {
        match self.backend.generate(prompt, self.config.call_timeout).await {
            Ok(text) => Ok(text),
            Err(e) if !e.is_retryable() => Err(e),
            Err(e) => {
                warn!(%article_id, "Retrying after failure: {}", e);
                tokio::time::sleep(self.config.retry_delay).await;
                self.backend.generate(prompt, self.config.call_timeout).await
            }
        }
    }

    /// Manual retry or re-summarise of one `done`/`failed` article.
    pub async fn requeue_article(&self, id: Uuid) -> Result<bool> {
        let changed = self.store.requeue_article(id).await?;
        if changed {
            info!(article_id = %id, "Article requeued for summarisation");
        }
        Ok(changed)
    }

    pub async fn status(&self) -> Result<StatusCounts> {
        Ok(self.store.status_counts().await?)
    }
}
