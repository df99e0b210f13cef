use interfaces::ArticleStore;
use sha2::{Digest, Sha256};

use crate::types::Result;

/// Content address of a url: hex SHA-256 of the trimmed, lowercased url.
pub fn url_hash(url: &str) -> String {
    let normalized = url.trim().to_lowercase();
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

pub async fn is_duplicate(store: &dyn ArticleStore, url_hash: &str) -> Result<bool> {
    Ok(store.url_hash_exists(url_hash).await?)
}
