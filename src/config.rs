//! Memory store configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the memory store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Embedding model code (a repo id understood by fastembed)
    #[serde(default = "default_model")]
    pub model: String,
    /// Directory for downloaded model artifacts; fastembed's default when unset
    #[serde(default)]
    pub model_cache_dir: Option<PathBuf>,
    /// Show a progress bar while downloading model artifacts
    #[serde(default)]
    pub show_download_progress: bool,
    /// How often the consolidator scans pending buffers
    #[serde(with = "humantime_serde", default = "default_flush_interval")]
    pub flush_interval: Duration,
    /// How long a query waits for its collection's pending buffer to drain
    #[serde(with = "humantime_serde", default = "default_drain_timeout")]
    pub drain_timeout: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        MemoryConfig {
            model: default_model(),
            model_cache_dir: None,
            show_download_progress: false,
            flush_interval: default_flush_interval(),
            drain_timeout: default_drain_timeout(),
        }
    }
}

fn default_model() -> String {
    "multilingual-e5-small".to_string()
}

fn default_flush_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_drain_timeout() -> Duration {
    Duration::from_secs(30)
}
