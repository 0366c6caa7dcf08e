//! # Hippocampus
//!
//! An embedded semantic-memory store with local embeddings for AI agents.
//!
//! Text is appended into named collections and embedded asynchronously by a
//! background consolidator; queries wait for the collection to quiesce and
//! return the committed entries closest to a clue (or simple
//! keyword-filtered listings).
//!
//! ## Features
//!
//! - **Local embeddings:** fastembed-powered, no external services
//! - **Non-blocking writes:** stores buffer text and return immediately
//! - **Consistent reads:** queries only ever observe fully committed state
//! - **Durable snapshots:** the whole store persists as one blob per cycle
//! - **Pluggable backends:** embedding and snapshot providers are traits
//!
//! ## Example
//!
//! ```no_run
//! use hippocampus::{MemoryConfig, MemoryStore};
//!
//! # async fn run() -> hippocampus::Result<()> {
//! let store = MemoryStore::new(MemoryConfig::default());
//! store.open("/var/lib/agent/memory").await?;
//!
//! store.store("notes", vec!["the sky is blue", "grass is green"]).await?;
//!
//! let hits = store.recall("notes", "color of sky", Some(1)).await?;
//! assert_eq!(hits[0].text, "the sky is blue");
//! # Ok(())
//! # }
//! ```

mod cache;
pub mod config;
mod consolidator;
pub mod embedding;
pub mod error;
pub mod persistence;
mod query;
pub mod store;
pub mod types;

pub use config::MemoryConfig;
pub use embedding::{EmbeddingBackend, EmbeddingService};
pub use error::{Error, Result};
pub use persistence::{FileSnapshotStore, Snapshot, SnapshotBackend};
pub use store::MemoryStore;
pub use types::{Content, QueryHit, StoreData};

/// Library version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
