//! Engine configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::types::AUTO_RENEW_ACTOR;

/// Configuration for a [`SyncEngine`](crate::engine::SyncEngine).
///
/// All fields have sensible defaults; a config file is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Actor id recorded on history entries written by the engine itself.
    #[serde(default = "default_auto_renew_actor")]
    pub auto_renew_actor: String,

    /// Capacity of the engine's input queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Whether a full refetch runs the past-due scan while rebuilding the
    /// partition.
    #[serde(default = "default_scan_on_refresh")]
    pub scan_on_refresh: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            auto_renew_actor: default_auto_renew_actor(),
            queue_capacity: default_queue_capacity(),
            scan_on_refresh: default_scan_on_refresh(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML file, falling back to defaults for
    /// absent fields.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: EngineConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }
}

fn default_auto_renew_actor() -> String {
    AUTO_RENEW_ACTOR.to_string()
}

fn default_queue_capacity() -> usize {
    64
}

fn default_scan_on_refresh() -> bool {
    true
}
