//! Store and pipeline configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Gateway implementation backing the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// In-process map, lost on exit
    Memory,
    /// Fjall (local LSM-tree storage)
    #[default]
    Fjall,
}

/// Store configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backend type
    pub backend: BackendType,

    /// Data directory path (for fjall)
    pub path: PathBuf,

    /// Sync the journal to disk after every commit
    pub sync_writes: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::Fjall,
            path: PathBuf::from("./data"),
            sync_writes: false,
        }
    }
}

fn default_max_batch_size() -> usize {
    1000
}

/// Batching pipeline configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum commands per round-trip
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// How long a batch stays open after its first command (e.g., "0s", "2ms").
    /// Zero closes it as soon as the submitting tasks yield.
    #[serde(with = "humantime_serde")]
    pub linger: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            linger: Duration::ZERO,
        }
    }
}

/// Key enumeration configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Keys fetched per page
    pub count: usize,

    /// Records fetched concurrently while streaming
    pub concurrency: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            count: 100,
            concurrency: 16,
        }
    }
}
