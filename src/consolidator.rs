//! Background consolidation: embeds pending texts and commits them durably
//!
//! One task runs for the store's lifetime. Each tick it walks every
//! collection with a non-empty pending buffer: embed the buffered texts,
//! merge the results into the committed collections (first write wins),
//! persist a full snapshot, then clear the buffer and wake drain waiters.
//! A failed cycle leaves the buffer untouched and is retried on the next
//! tick, so embedding attempts are at-least-once and the merge keeps them
//! idempotent. Collections are processed independently.

use crate::embedding::EmbeddingBackend;
use crate::error::Result;
use crate::persistence::{Snapshot, SnapshotBackend};
use crate::store::Shared;
use crate::types::PendingBuffer;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

pub(crate) struct Consolidator {
    shared: Arc<Shared>,
    embedder: Arc<dyn EmbeddingBackend>,
    snapshots: Arc<dyn SnapshotBackend>,
    shutdown: Arc<Notify>,
}

impl Consolidator {
    pub(crate) fn new(
        shared: Arc<Shared>,
        embedder: Arc<dyn EmbeddingBackend>,
        snapshots: Arc<dyn SnapshotBackend>,
        shutdown: Arc<Notify>,
    ) -> Self {
        Consolidator {
            shared,
            embedder,
            snapshots,
            shutdown,
        }
    }

    /// Main consolidation loop. Ticks at the configured flush interval and
    /// wakes early whenever a store call signals new pending texts.
    pub(crate) async fn run(self) {
        let mut interval = tokio::time::interval(self.shared.config.flush_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Consolidator started, flush interval: {:?}",
            self.shared.config.flush_interval
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.shared.flush_needed.notified() => {}
                _ = self.shutdown.notified() => {
                    info!("Consolidator stopped");
                    return;
                }
            }
            self.tick().await;
        }
    }

    async fn tick(&self) {
        let buffers: Vec<(String, Arc<PendingBuffer>)> = {
            let registry = self.shared.buffers.lock().await;
            registry
                .iter()
                .map(|(name, buffer)| (name.clone(), buffer.clone()))
                .collect()
        };

        for (collection, buffer) in buffers {
            if let Err(e) = self.flush(&collection, &buffer).await {
                // Buffer left intact; the same texts are retried next tick.
                if e.is_retryable() {
                    warn!("Consolidation of '{}' failed, will retry: {}", collection, e);
                } else {
                    error!("Consolidation of '{}' failed: {}", collection, e);
                }
            }
        }
    }

    async fn flush(&self, collection: &str, buffer: &PendingBuffer) -> Result<()> {
        // Held for the whole cycle: stores to this collection wait, and the
        // buffer cannot change between embedding and clearing.
        let mut texts = buffer.texts.lock().await;
        if texts.is_empty() {
            return Ok(());
        }

        let embeddings = self.embedder.embed_batch(texts.clone()).await?;

        {
            let mut data = self.shared.data.write().await;
            let entries = data.collections.entry(collection.to_string()).or_default();
            for (text, embedding) in texts.iter().zip(embeddings) {
                // First write wins; re-embedded duplicates are dropped here.
                entries.entry(text.clone()).or_insert(embedding);
            }
        }

        self.persist().await?;

        debug!("Committed {} texts to '{}'", texts.len(), collection);
        texts.clear();
        drop(texts);
        buffer.drained.notify_waiters();
        Ok(())
    }

    /// Write a full snapshot when a persistence target is configured.
    async fn persist(&self) -> Result<()> {
        let target = self.shared.target.read().await.clone();
        let Some(dir) = target else {
            return Ok(());
        };
        let snapshot = {
            let data = self.shared.data.read().await;
            Snapshot::capture(&data, self.embedder.model_file())
        };
        self.snapshots.save(&dir, &snapshot).await
    }
}
