//! The memory store: collections, pending buffers, and the public API
//!
//! `MemoryStore` owns the committed collections, the per-collection pending
//! buffers, and the background consolidator task. Store calls append to a
//! buffer and return immediately; queries wait until the collection has
//! drained, so they only ever observe fully committed entries.

use crate::cache::EmbeddingCache;
use crate::config::MemoryConfig;
use crate::consolidator::Consolidator;
use crate::embedding::{EmbeddingBackend, EmbeddingService};
use crate::error::{Error, Result};
use crate::persistence::{FileSnapshotStore, SnapshotBackend};
use crate::query;
use crate::types::{Content, PendingBuffer, QueryHit, StoreData};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// State shared between the public API and the consolidator task.
pub(crate) struct Shared {
    pub(crate) config: MemoryConfig,
    /// Committed collections; additions come from the consolidator only
    pub(crate) data: RwLock<StoreData>,
    /// Registry of per-collection pending buffers
    pub(crate) buffers: Mutex<HashMap<String, Arc<PendingBuffer>>>,
    /// Persistence directory; `None` in non-persistent mode
    pub(crate) target: RwLock<Option<PathBuf>>,
    /// Wakes the consolidator ahead of its next tick
    pub(crate) flush_needed: Notify,
}

/// The embedded semantic-memory store.
///
/// Callers append text into named collections; a background consolidator
/// embeds it locally and commits it durably; queries wait for the
/// collection to quiesce and rank committed entries by similarity.
pub struct MemoryStore {
    shared: Arc<Shared>,
    embedder: Arc<dyn EmbeddingBackend>,
    snapshots: Arc<dyn SnapshotBackend>,
    cache: EmbeddingCache,
    shutdown: Arc<Notify>,
    consolidator: StdMutex<Option<JoinHandle<()>>>,
}

impl MemoryStore {
    /// Create a store with the default local embedding backend and
    /// filesystem snapshots.
    ///
    /// The consolidator task is spawned here, so this must be called from
    /// within a tokio runtime.
    pub fn new(config: MemoryConfig) -> Self {
        let embedder = Arc::new(EmbeddingService::new(&config));
        Self::with_backends(config, embedder, Arc::new(FileSnapshotStore))
    }

    /// Create a store with custom embedding and snapshot backends.
    pub fn with_backends(
        config: MemoryConfig,
        embedder: Arc<dyn EmbeddingBackend>,
        snapshots: Arc<dyn SnapshotBackend>,
    ) -> Self {
        let shared = Arc::new(Shared {
            data: RwLock::new(StoreData::new(config.model.clone())),
            buffers: Mutex::new(HashMap::new()),
            target: RwLock::new(None),
            flush_needed: Notify::new(),
            config,
        });
        let shutdown = Arc::new(Notify::new());
        let consolidator = Consolidator::new(
            shared.clone(),
            embedder.clone(),
            snapshots.clone(),
            shutdown.clone(),
        );
        let handle = tokio::spawn(consolidator.run());

        MemoryStore {
            shared,
            embedder,
            snapshots,
            cache: EmbeddingCache::new(),
            shutdown,
            consolidator: StdMutex::new(Some(handle)),
        }
    }

    /// Open the store against a persistence directory.
    ///
    /// A blank directory selects non-persistent mode. A non-empty directory
    /// loads an existing snapshot wholesale (the snapshot's recorded model
    /// identity wins) and makes future consolidation cycles persist there.
    /// Loads and validates the embedding model in both cases; failures here
    /// propagate, since there is no safe fallback state.
    pub async fn open(&self, directory: &str) -> Result<String> {
        let directory = directory.trim();
        if directory.is_empty() {
            *self.shared.target.write().await = None;
            let model = self.prepare_model().await?;
            info!("Memory store switched to non-persistent mode");
            return Ok(format!(
                "memory store switched to a non-persistent mode. model: {}, file: {}",
                model,
                self.embedder.model_file().unwrap_or_default()
            ));
        }

        let dir = PathBuf::from(directory);
        tokio::fs::create_dir_all(&dir).await?;

        if let Some(snapshot) = self.snapshots.load(&dir).await? {
            let mut data = self.shared.data.write().await;
            data.model = snapshot.model;
            data.collections = snapshot.collections;
        }
        *self.shared.target.write().await = Some(dir.clone());

        let model = self.prepare_model().await?;
        self.check_dimensions().await?;

        info!("Memory store opened at {}", dir.display());
        Ok(format!(
            "memory store under {} is opened. model: {}, file: {}",
            dir.display(),
            model,
            self.embedder.model_file().unwrap_or_default()
        ))
    }

    /// Clear every collection in place.
    ///
    /// Pending texts that have not been embedded yet are discarded as well,
    /// so nothing stored before the reset can land in the cleared
    /// collections afterwards.
    pub async fn reset(&self) -> String {
        self.shared.data.write().await.collections.clear();

        let buffers: Vec<Arc<PendingBuffer>> = {
            let registry = self.shared.buffers.lock().await;
            registry.values().cloned().collect()
        };
        for buffer in buffers {
            buffer.texts.lock().await.clear();
            buffer.drained.notify_waiters();
        }

        info!("Memory store reset");
        "memory store reset".to_string()
    }

    /// Queue texts for embedding into a collection.
    ///
    /// Creates the collection on first use. Returns as soon as the texts
    /// are buffered; embedding and persistence happen in the background.
    /// Duplicates are not filtered here; the merge keeps the first
    /// committed vector for a text and drops the rest.
    pub async fn store(&self, collection: &str, content: impl Into<Content>) -> Result<()> {
        if collection.is_empty() {
            return Err(Error::InvalidInput("collection name is empty".into()));
        }
        let texts = content.into().into_texts();
        if texts.is_empty() {
            return Ok(());
        }
        debug!("Storing {} texts into '{}'", texts.len(), collection);

        let buffer = {
            let mut data = self.shared.data.write().await;
            let mut registry = self.shared.buffers.lock().await;
            // The collection and its buffer are created together.
            data.collections.entry(collection.to_string()).or_default();
            registry.entry(collection.to_string()).or_default().clone()
        };

        buffer.texts.lock().await.extend(texts);
        self.shared.flush_needed.notify_one();
        Ok(())
    }

    /// Query a collection by similarity and/or keyword filter.
    ///
    /// Waits until the collection's pending buffer has drained (bounded by
    /// [`MemoryConfig::drain_timeout`]) so the result reflects committed
    /// entries only. `keywords` AND-filters candidates by literal
    /// substring. An empty `clue` lists candidates in arbitrary order with
    /// no distance; otherwise candidates are ranked ascending by squared
    /// Euclidean distance from the clue's embedding. `limit: None` returns
    /// all matches. An unknown collection yields an empty result.
    pub async fn query(
        &self,
        collection: &str,
        clue: &str,
        keywords: Option<&[String]>,
        limit: Option<usize>,
    ) -> Result<Vec<QueryHit>> {
        if !self
            .shared
            .data
            .read()
            .await
            .collections
            .contains_key(collection)
        {
            return Ok(Vec::new());
        }

        self.wait_for_drain(collection).await?;

        let clue_embedding = if clue.is_empty() {
            None
        } else {
            Some(self.clue_embedding(clue).await?)
        };

        let data = self.shared.data.read().await;
        let Some(entries) = data.collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut candidates: Vec<String> = entries.keys().cloned().collect();
        if let Some(keywords) = keywords {
            candidates = query::filter_by_keywords(candidates, keywords);
        }

        let mut hits = match &clue_embedding {
            None => candidates
                .into_iter()
                .map(|text| QueryHit {
                    text,
                    distance: None,
                })
                .collect(),
            Some(embedding) => query::rank_by_distance(entries, candidates, embedding),
        };
        if let Some(limit) = limit {
            hits.truncate(limit);
        }

        debug!("Query on '{}' returned {} hits", collection, hits.len());
        Ok(hits)
    }

    /// Convenience wrapper: similarity query with no keyword filter.
    pub async fn recall(
        &self,
        collection: &str,
        query: &str,
        limit: Option<usize>,
    ) -> Result<Vec<QueryHit>> {
        self.query(collection, query, None, limit).await
    }

    /// Stop the background consolidator.
    ///
    /// Texts still pending at this point stay unflushed and are lost when
    /// the store is dropped.
    pub async fn shutdown(&self) {
        self.shutdown.notify_one();
        let handle = match self.consolidator.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    async fn prepare_model(&self) -> Result<String> {
        let model = self.shared.data.read().await.model.clone();
        self.embedder.prepare(&model).await?;
        Ok(model)
    }

    /// A snapshot written by a different model would hold vectors of the
    /// wrong width; catch that at open time instead of at query time.
    async fn check_dimensions(&self) -> Result<()> {
        let Some(dim) = self.embedder.dimensions() else {
            return Ok(());
        };
        let data = self.shared.data.read().await;
        for (name, entries) in &data.collections {
            if let Some((_, vector)) = entries.iter().next() {
                if vector.len() != dim {
                    return Err(Error::Persistence(format!(
                        "collection '{}' holds {}-dimensional vectors but model '{}' produces {}",
                        name,
                        vector.len(),
                        data.model,
                        dim
                    )));
                }
            }
        }
        Ok(())
    }

    /// Block until the collection's pending buffer is empty, or time out.
    async fn wait_for_drain(&self, collection: &str) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.shared.config.drain_timeout;
        loop {
            let buffer = {
                let registry = self.shared.buffers.lock().await;
                registry.get(collection).cloned()
            };
            let Some(buffer) = buffer else {
                return Ok(());
            };

            // Register for the drain signal before checking, so a flush
            // completing in between cannot be missed.
            let drained = buffer.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();

            if buffer.texts.lock().await.is_empty() {
                return Ok(());
            }

            if tokio::time::timeout_at(deadline, drained).await.is_err() {
                return Err(Error::Timeout(format!(
                    "collection '{}' did not drain within {:?}",
                    collection, self.shared.config.drain_timeout
                )));
            }
        }
    }

    /// Get or compute the clue's embedding, through the cache.
    async fn clue_embedding(&self, clue: &str) -> Result<Vec<f32>> {
        let model = self.shared.data.read().await.model.clone();
        if let Some(cached) = self.cache.get(&model, clue).await {
            return Ok(cached);
        }

        let embedding = self.embedder.embed(clue).await?;
        self.cache.put(&model, clue, embedding.clone()).await;
        Ok(embedding)
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.consolidator.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::hash::{DefaultHasher, Hash, Hasher};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    fn test_config() -> MemoryConfig {
        MemoryConfig {
            flush_interval: Duration::from_millis(10),
            drain_timeout: Duration::from_millis(500),
            ..MemoryConfig::default()
        }
    }

    /// Deterministic embedding backend: fixed vectors for known texts,
    /// hash-derived vectors otherwise. No model download involved.
    struct StubEmbedder {
        fixed: HashMap<String, Vec<f32>>,
        dim: usize,
        calls: AtomicUsize,
        failing: AtomicBool,
        salt: bool,
    }

    impl StubEmbedder {
        fn new(dim: usize) -> Self {
            StubEmbedder {
                fixed: HashMap::new(),
                dim,
                calls: AtomicUsize::new(0),
                failing: AtomicBool::new(false),
                salt: false,
            }
        }

        fn with_fixed(mut self, text: &str, vector: Vec<f32>) -> Self {
            self.fixed.insert(text.to_string(), vector);
            self
        }

        /// Make every batch produce different vectors for the same text,
        /// to observe which embedding of a duplicate ends up committed.
        fn salted(mut self) -> Self {
            self.salt = true;
            self
        }

        fn vector_for(&self, text: &str) -> Vec<f32> {
            if let Some(vector) = self.fixed.get(text) {
                return vector.clone();
            }
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            let seed = hasher.finish();
            (0..self.dim)
                .map(|i| ((seed >> (8 * (i % 8))) & 0xff) as f32 / 255.0)
                .collect()
        }
    }

    #[async_trait]
    impl EmbeddingBackend for StubEmbedder {
        async fn prepare(&self, _model_code: &str) -> Result<()> {
            Ok(())
        }

        async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(Error::Model("stub embedding failure".into()));
            }
            let call = self.calls.fetch_add(1, Ordering::SeqCst) as f32;
            Ok(texts
                .iter()
                .map(|text| {
                    let mut vector = self.vector_for(text);
                    if self.salt {
                        *vector.last_mut().unwrap() = call;
                    }
                    vector
                })
                .collect())
        }

        fn model_file(&self) -> Option<String> {
            Some("stub.onnx".to_string())
        }

        fn dimensions(&self) -> Option<usize> {
            Some(self.dim)
        }
    }

    fn test_store(embedder: Arc<StubEmbedder>) -> MemoryStore {
        MemoryStore::with_backends(test_config(), embedder, Arc::new(FileSnapshotStore))
    }

    #[tokio::test]
    async fn test_store_then_query_commits_each_text_once() {
        let embedder = Arc::new(StubEmbedder::new(3));
        let store = test_store(embedder);
        store.open("").await.unwrap();

        store
            .store("notes", vec!["the sky is blue", "grass is green"])
            .await
            .unwrap();

        let hits = store.query("notes", "", None, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|hit| hit.distance.is_none()));

        let data = store.shared.data.read().await;
        let entries = &data.collections["notes"];
        assert_eq!(entries.len(), 2);
        for vector in entries.values() {
            assert_eq!(vector.len(), 3);
        }
    }

    #[tokio::test]
    async fn test_similarity_orders_ascending() {
        let embedder = Arc::new(
            StubEmbedder::new(2)
                .with_fixed("the sky is blue", vec![1.0, 0.0])
                .with_fixed("grass is green", vec![5.0, 0.0])
                .with_fixed("stones are grey", vec![10.0, 0.0])
                .with_fixed("color of sky", vec![0.0, 0.0]),
        );
        let store = test_store(embedder);
        store.open("").await.unwrap();

        store
            .store(
                "notes",
                vec!["the sky is blue", "grass is green", "stones are grey"],
            )
            .await
            .unwrap();

        let hits = store
            .query("notes", "color of sky", None, Some(2))
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "the sky is blue");
        assert_eq!(hits[0].distance, Some(1.0));
        assert_eq!(hits[1].text, "grass is green");
        assert_eq!(hits[1].distance, Some(25.0));
    }

    #[tokio::test]
    async fn test_recall_matches_query() {
        let embedder = Arc::new(
            StubEmbedder::new(2)
                .with_fixed("near", vec![1.0, 0.0])
                .with_fixed("far", vec![9.0, 0.0])
                .with_fixed("clue", vec![0.0, 0.0]),
        );
        let store = test_store(embedder);
        store.open("").await.unwrap();
        store.store("c", vec!["near", "far"]).await.unwrap();

        let recalled = store.recall("c", "clue", Some(1)).await.unwrap();
        let queried = store.query("c", "clue", None, Some(1)).await.unwrap();
        assert_eq!(recalled, queried);
        assert_eq!(recalled[0].text, "near");
    }

    #[tokio::test]
    async fn test_keyword_filter_requires_all_keywords() {
        let embedder = Arc::new(StubEmbedder::new(2));
        let store = test_store(embedder);
        store.open("").await.unwrap();

        store
            .store(
                "facts",
                vec![
                    "water boils at 100C",
                    "water freezes at 0C",
                    "lava is hot",
                ],
            )
            .await
            .unwrap();

        let keywords = vec!["water".to_string(), "boils".to_string()];
        let hits = store
            .query("facts", "", Some(&keywords), None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "water boils at 100C");
        assert_eq!(hits[0].distance, None);
    }

    #[tokio::test]
    async fn test_unknown_collection_returns_empty() {
        let store = test_store(Arc::new(StubEmbedder::new(2)));
        store.open("").await.unwrap();

        let hits = store
            .query("nonexistent", "anything", None, Some(1))
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_limit_none_returns_all() {
        let store = test_store(Arc::new(StubEmbedder::new(2)));
        store.open("").await.unwrap();
        store.store("c", vec!["a", "b", "c"]).await.unwrap();

        let all = store.query("c", "", None, None).await.unwrap();
        assert_eq!(all.len(), 3);

        let some = store.query("c", "", None, Some(2)).await.unwrap();
        assert_eq!(some.len(), 2);
    }

    #[tokio::test]
    async fn test_first_write_wins_for_duplicates() {
        let embedder = Arc::new(StubEmbedder::new(2).salted());
        let store = test_store(embedder.clone());
        store.open("").await.unwrap();

        store.store("c", "dup").await.unwrap();
        store.query("c", "", None, None).await.unwrap();
        let first = store.shared.data.read().await.collections["c"]["dup"].clone();

        store.store("c", "dup").await.unwrap();
        store.query("c", "", None, None).await.unwrap();
        let after = store.shared.data.read().await.collections["c"]["dup"].clone();

        // The duplicate was re-embedded but the committed vector is unchanged.
        assert!(embedder.calls.load(Ordering::SeqCst) >= 2);
        assert_eq!(first, after);
    }

    #[tokio::test]
    async fn test_embedding_failure_times_out_then_recovers() {
        let embedder = Arc::new(StubEmbedder::new(2));
        embedder.failing.store(true, Ordering::SeqCst);
        let store = test_store(embedder.clone());
        store.open("").await.unwrap();

        store.store("c", "text").await.unwrap();
        let err = store.query("c", "", None, None).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));

        embedder.failing.store(false, Ordering::SeqCst);
        let hits = store.query("c", "", None, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "text");
    }

    #[tokio::test]
    async fn test_reset_clears_committed_and_pending() {
        let embedder = Arc::new(StubEmbedder::new(2));
        let store = test_store(embedder.clone());
        store.open("").await.unwrap();

        store.store("c", vec!["a", "b"]).await.unwrap();
        store.query("c", "", None, None).await.unwrap();

        embedder.failing.store(true, Ordering::SeqCst);
        store.store("c", "ghost").await.unwrap();

        let message = store.reset().await;
        assert_eq!(message, "memory store reset");

        embedder.failing.store(false, Ordering::SeqCst);
        let hits = store.query("c", "", None, None).await.unwrap();
        assert!(hits.is_empty());

        let registry = store.shared.buffers.lock().await;
        assert!(registry["c"].texts.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_persistence_round_trip_across_stores() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap();

        let store = test_store(Arc::new(StubEmbedder::new(2)));
        store.open(path).await.unwrap();
        store.store("facts", "water boils at 100C").await.unwrap();
        // Draining implies the snapshot has been written.
        store.query("facts", "", None, None).await.unwrap();
        store.shutdown().await;

        let reopened = test_store(Arc::new(StubEmbedder::new(2)));
        reopened.open(path).await.unwrap();
        let keywords = vec!["boils".to_string()];
        let hits = reopened
            .query("facts", "", Some(&keywords), None)
            .await
            .unwrap();
        assert_eq!(
            hits,
            vec![QueryHit {
                text: "water boils at 100C".to_string(),
                distance: None,
            }]
        );
    }

    #[tokio::test]
    async fn test_open_rejects_mismatched_snapshot_dimensions() {
        let dir = tempfile::tempdir().unwrap();

        let mut data = StoreData::new("stub-model");
        data.collections.insert(
            "c".to_string(),
            HashMap::from([("t".to_string(), vec![1.0, 2.0, 3.0])]),
        );
        FileSnapshotStore
            .save(dir.path(), &crate::persistence::Snapshot::capture(&data, None))
            .await
            .unwrap();

        let store = test_store(Arc::new(StubEmbedder::new(2)));
        let err = store
            .open(dir.path().to_str().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
    }

    #[tokio::test]
    async fn test_open_blank_directory_is_non_persistent() {
        let store = test_store(Arc::new(StubEmbedder::new(2)));
        let message = store.open("   ").await.unwrap();
        assert!(message.contains("non-persistent"));
        assert!(store.shared.target.read().await.is_none());
    }

    #[tokio::test]
    async fn test_store_rejects_empty_collection_name() {
        let store = test_store(Arc::new(StubEmbedder::new(2)));
        store.open("").await.unwrap();
        let err = store.store("", "text").await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
