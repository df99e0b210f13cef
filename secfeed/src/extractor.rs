//! Best-effort article text and lead-image extraction.
//!
//! Three tiers, first acceptable result wins:
//! 1. fetch the page and pull readable paragraph text plus `og:image`;
//! 2. the feed entry's own content/summary with markup stripped;
//! 3. the entry title joined with the feed or source name.
//!
//! Extraction never fails and never yields empty content.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use crate::fetcher::PageFetcher;
use crate::types::ParsedEntry;

pub const MAX_CONTENT_CHARS: usize = 3000;
/// Page text must be longer than this to beat the feed's own fields.
pub const MIN_PAGE_TEXT_CHARS: usize = 100;
/// Feed-provided text must be longer than this to beat the title fallback.
pub const MIN_FEED_TEXT_CHARS: usize = 50;
pub const DEFAULT_PAGE_TIMEOUT: Duration = Duration::from_secs(10);

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("Invalid markup regex"));
static WS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("Invalid whitespace regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub content: String,
    pub image_url: Option<String>,
}

pub struct ContentExtractor {
    pages: Arc<dyn PageFetcher>,
    page_timeout: Duration,
}

impl ContentExtractor {
    pub fn new(pages: Arc<dyn PageFetcher>) -> Self {
        Self {
            pages,
            page_timeout: DEFAULT_PAGE_TIMEOUT,
        }
    }

    pub fn with_page_timeout(mut self, timeout: Duration) -> Self {
        self.page_timeout = timeout;
        self
    }

    pub async fn extract(&self, url: &str, entry: &ParsedEntry, source_name: &str) -> Extracted {
        let (page_text, image_url) = self.from_page(url).await;

        if let Some(content) = page_text {
            return Extracted { content, image_url };
        }

        let content = from_feed_fields(entry)
            .unwrap_or_else(|| title_fallback(entry, source_name));

        Extracted { content, image_url }
    }

    /// Tier 1. The image is kept even when the text is rejected.
    async fn from_page(&self, url: &str) -> (Option<String>, Option<String>) {
        let html = match tokio::time::timeout(self.page_timeout, self.pages.fetch_page(url)).await {
            Ok(Ok(html)) => html,
            Ok(Err(e)) => {
                debug!("Page fetch failed for {}: {}", url, e);
                return (None, None);
            }
            Err(_) => {
                debug!("Page fetch timed out for {} after {:?}", url, self.page_timeout);
                return (None, None);
            }
        };

        let base = url.to_string();
        let parsed = tokio::task::spawn_blocking(move || readable_page(&html, &base)).await;
        let (text, image_url) = match parsed {
            Ok(result) => result,
            Err(e) => {
                debug!("Page parsing task failed for {}: {}", url, e);
                return (None, None);
            }
        };

        let text = text.trim();
        let accepted = (text.chars().count() > MIN_PAGE_TEXT_CHARS)
            .then(|| truncate_chars(text, MAX_CONTENT_CHARS));

        (accepted, image_url)
    }
}

/// Tier 2: entry content first, then its summary/description.
pub fn from_feed_fields(entry: &ParsedEntry) -> Option<String> {
    [entry.content.as_deref(), entry.summary.as_deref()]
        .into_iter()
        .flatten()
        .map(strip_markup)
        .find(|clean| clean.chars().count() > MIN_FEED_TEXT_CHARS)
        .map(|clean| truncate_chars(&clean, MAX_CONTENT_CHARS))
}

/// Tier 3: never empty.
pub fn title_fallback(entry: &ParsedEntry, source_name: &str) -> String {
    let title = entry.title.as_deref().unwrap_or_default().trim();
    let origin = entry
        .feed_title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| source_name.trim());

    let joined = [title, origin]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(". ");

    if joined.is_empty() {
        "Untitled".to_string()
    } else {
        joined
    }
}

/// Remove tags, decode the common entities and collapse whitespace.
pub fn strip_markup(raw: &str) -> String {
    let without_tags = TAG_RE.replace_all(raw, " ");
    let decoded = without_tags
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#8217;", "\u{2019}")
        .replace("&amp;", "&");
    WS_RE.replace_all(&decoded, " ").trim().to_string()
}

pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Readable paragraph text and lead image of an HTML page.
fn readable_page(html: &str, page_url: &str) -> (String, Option<String>) {
    let document = Html::parse_document(html);

    let text = paragraph_text(&document, "article p, main p")
        .or_else(|| paragraph_text(&document, "p"))
        .or_else(|| paragraph_text(&document, "body"))
        .unwrap_or_default();

    (text, lead_image(&document, page_url))
}

fn paragraph_text(document: &Html, css: &str) -> Option<String> {
    let selector = Selector::parse(css).ok()?;
    let parts: Vec<String> = document
        .select(&selector)
        .map(|el| WS_RE.replace_all(&el.text().collect::<String>(), " ").trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();

    (!parts.is_empty()).then(|| parts.join("\n\n"))
}

fn lead_image(document: &Html, page_url: &str) -> Option<String> {
    const CANDIDATES: [&str; 4] = [
        r#"meta[property="og:image"]"#,
        r#"meta[name="og:image"]"#,
        r#"meta[name="twitter:image"]"#,
        r#"meta[property="twitter:image"]"#,
    ];

    let raw = CANDIDATES.iter().find_map(|css| {
        let selector = Selector::parse(css).ok()?;
        document
            .select(&selector)
            .filter_map(|el| el.value().attr("content"))
            .map(str::trim)
            .find(|content| !content.is_empty())
            .map(str::to_string)
    })?;

    // Relative image paths resolve against the page.
    match Url::parse(&raw) {
        Ok(absolute) => Some(absolute.to_string()),
        Err(_) => Url::parse(page_url)
            .and_then(|base| base.join(&raw))
            .ok()
            .map(|u| u.to_string()),
    }
}
