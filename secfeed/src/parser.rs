use crate::types::{ParsedEntry, ParsedFeed, PipelineError, Result};
use feed_rs::parser;
use tracing::debug;

pub struct FeedParser;

impl FeedParser {
    /// Parse an RSS/Atom/JSON feed document.
    pub fn parse(content: &[u8]) -> Result<ParsedFeed> {
        debug!("Parsing feed content ({} bytes)", content.len());

        let feed = parser::parse(content)
            .map_err(|e| PipelineError::Parse(format!("Failed to parse feed: {}", e)))?;

        let feed_title = feed.title.map(|t| t.content);

        let entries = feed
            .entries
            .into_iter()
            .map(|entry| Self::parse_entry(entry, feed_title.clone()))
            .collect();

        Ok(ParsedFeed {
            title: feed_title,
            entries,
        })
    }

    fn parse_entry(entry: feed_rs::model::Entry, feed_title: Option<String>) -> ParsedEntry {
        let link = entry
            .links
            .first()
            .map(|l| l.href.trim().to_string())
            .filter(|href| !href.is_empty())
            .or_else(|| entry.id.starts_with("http").then(|| entry.id.clone()));

        let title = entry
            .title
            .map(|t| t.content.trim().to_string())
            .filter(|t| !t.is_empty());

        let content = entry.content.and_then(|c| c.body);
        let summary = entry.summary.map(|s| s.content);

        // Update times are not publish times.
        let published_at = entry.published;

        ParsedEntry {
            link,
            title,
            content,
            summary,
            published_at,
            feed_title,
        }
    }
}

/// Parse on the blocking pool so large documents never stall the scheduler.
pub async fn parse_feed_blocking(content: Vec<u8>) -> Result<ParsedFeed> {
    tokio::task::spawn_blocking(move || FeedParser::parse(&content)).await?
}
