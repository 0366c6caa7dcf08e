//! Snapshot persistence: whole-store dump and load through a blob store
//!
//! Every consolidation cycle rewrites the entire snapshot, so dump cost
//! grows with total stored vector volume. That trade keeps recovery a
//! single read with no log replay.

use crate::error::{Error, Result};
use crate::types::StoreData;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::Path;

/// File name of the snapshot blob inside a store directory
pub const SNAPSHOT_FILE: &str = "vecdb.json";

/// The full serialized state of the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Embedding model code the vectors were produced with
    pub model: String,
    /// Resolved model artifact file name
    pub model_file: String,
    /// When this snapshot was written
    pub saved_at: DateTime<Utc>,
    /// Collection name -> (text -> embedding vector)
    pub collections: HashMap<String, HashMap<String, Vec<f32>>>,
}

impl Snapshot {
    /// Capture the committed state for serialization.
    pub fn capture(data: &StoreData, model_file: Option<String>) -> Self {
        Snapshot {
            model: data.model.clone(),
            model_file: model_file.unwrap_or_default(),
            saved_at: Utc::now(),
            collections: data.collections.clone(),
        }
    }
}

/// Durable blob store capability consumed by the consolidator and `open`.
///
/// Implement this trait to persist snapshots somewhere other than the
/// local filesystem.
#[async_trait]
pub trait SnapshotBackend: Send + Sync {
    /// Write the snapshot under `dir`, overwriting any previous one.
    async fn save(&self, dir: &Path, snapshot: &Snapshot) -> Result<()>;

    /// Read the snapshot under `dir`; `None` when no snapshot exists yet.
    async fn load(&self, dir: &Path) -> Result<Option<Snapshot>>;
}

/// Filesystem-backed snapshot store writing one JSON blob per directory
#[derive(Debug, Default, Clone)]
pub struct FileSnapshotStore;

#[async_trait]
impl SnapshotBackend for FileSnapshotStore {
    async fn save(&self, dir: &Path, snapshot: &Snapshot) -> Result<()> {
        let path = dir.join(SNAPSHOT_FILE);
        let bytes = serde_json::to_vec(snapshot)?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| Error::Persistence(format!("failed to write {}: {}", path.display(), e)))
    }

    async fn load(&self, dir: &Path) -> Result<Option<Snapshot>> {
        let path = dir.join(SNAPSHOT_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let snapshot = serde_json::from_slice(&bytes).map_err(|e| {
                    Error::Persistence(format!("corrupt snapshot {}: {}", path.display(), e))
                })?;
                Ok(Some(snapshot))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }
}
