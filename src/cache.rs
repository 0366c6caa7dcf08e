//! In-process caching for query-clue embeddings
//!
//! Uses moka async cache (Send + Sync, TTL-based eviction). Keys include
//! the model code so entries go stale when the store switches models.

use moka::future::Cache;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::Duration;

/// Cache key helper: hash a string to u64
fn hash_key(s: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    s.hash(&mut hasher);
    hasher.finish()
}

/// In-process embedding cache
#[derive(Clone)]
pub(crate) struct EmbeddingCache {
    /// hash(model + text) -> embedding vector
    embeddings: Cache<u64, Vec<f32>>,
}

impl EmbeddingCache {
    /// Create a new cache with default settings
    pub(crate) fn new() -> Self {
        EmbeddingCache {
            embeddings: Cache::builder()
                .max_capacity(1000)
                .time_to_live(Duration::from_secs(30 * 60)) // 30 min TTL
                .build(),
        }
    }

    /// Get a cached embedding
    pub(crate) async fn get(&self, model: &str, text: &str) -> Option<Vec<f32>> {
        let key = format!("{}:{}", model, text);
        self.embeddings.get(&hash_key(&key)).await
    }

    /// Store an embedding in cache
    pub(crate) async fn put(&self, model: &str, text: &str, embedding: Vec<f32>) {
        let key = format!("{}:{}", model, text);
        self.embeddings.insert(hash_key(&key), embedding).await;
    }
}
