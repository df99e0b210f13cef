use std::path::Path;

use interfaces::{ArticleStore, SourceSpec};
use serde::Deserialize;
use tracing::{error, info};

use crate::types::Result;

#[derive(Debug, Deserialize)]
struct FeedsFile {
    #[serde(default)]
    feeds: Vec<SourceSpec>,
}

/// Read `{ "feeds": [...] }` from disk.
pub async fn load_source_specs(path: &Path) -> Result<Vec<SourceSpec>> {
    let raw = tokio::fs::read_to_string(path).await?;
    let file: FeedsFile = serde_json::from_str(&raw)?;
    Ok(file.feeds)
}

/// Populate the source table from `path` when it is empty. Returns rows added.
///
/// A missing or malformed file is logged and treated as nothing to seed.
pub async fn seed_sources_if_empty(store: &dyn ArticleStore, path: &Path) -> Result<u64> {
    if store.source_count().await? > 0 {
        return Ok(0);
    }

    let specs = match load_source_specs(path).await {
        Ok(specs) => specs,
        Err(e) => {
            error!("Failed to seed sources from {}: {}", path.display(), e);
            return Ok(0);
        }
    };

    let added = store.add_sources(&specs).await?;
    info!("Sources seeded from {} ({} added)", path.display(), added);
    Ok(added)
}
