//! Core data types: committed collections, pending buffers, query results

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::{Mutex, Notify};

/// The committed store state: model identity plus all collections.
///
/// Mutated only by the consolidator (insertions), `reset` (clear), and
/// snapshot load (wholesale replace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreData {
    /// Embedding model code the stored vectors were produced with
    pub model: String,
    /// Collection name -> (text -> embedding vector)
    pub collections: HashMap<String, HashMap<String, Vec<f32>>>,
}

impl StoreData {
    /// Create an empty store bound to a model code.
    pub fn new(model: impl Into<String>) -> Self {
        StoreData {
            model: model.into(),
            collections: HashMap::new(),
        }
    }
}

/// Per-collection queue of texts awaiting embedding.
///
/// Created lazily the first time a collection is stored into. Not
/// persisted: texts that have not been consolidated when the process
/// exits are lost.
#[derive(Default)]
pub struct PendingBuffer {
    /// Texts not yet embedded, in arrival order
    pub texts: Mutex<Vec<String>>,
    /// Signaled whenever a flush cycle empties this buffer
    pub drained: Notify,
}

/// Text payload accepted by [`store`](crate::MemoryStore::store): a single
/// string or a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    /// One text
    One(String),
    /// A batch of texts, stored in order
    Many(Vec<String>),
}

impl Content {
    /// Normalize to a list of texts.
    pub fn into_texts(self) -> Vec<String> {
        match self {
            Content::One(text) => vec![text],
            Content::Many(texts) => texts,
        }
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Content::One(text.to_string())
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Content::One(text)
    }
}

impl From<Vec<String>> for Content {
    fn from(texts: Vec<String>) -> Self {
        Content::Many(texts)
    }
}

impl From<Vec<&str>> for Content {
    fn from(texts: Vec<&str>) -> Self {
        Content::Many(texts.into_iter().map(String::from).collect())
    }
}

impl From<&[&str]> for Content {
    fn from(texts: &[&str]) -> Self {
        Content::Many(texts.iter().map(|t| t.to_string()).collect())
    }
}

/// One query result: a stored text and its distance from the clue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryHit {
    /// The stored text
    pub text: String,
    /// Squared Euclidean distance to the clue embedding; `None` for
    /// keyword-only listings
    pub distance: Option<f32>,
}
