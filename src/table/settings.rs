//! Engine and table configuration.
//!
//! `EngineSettings` is process-wide (one per server) and can be loaded from a
//! JSON file; `TableSettings` describes one table instance.

use super::error::{TableError, TableResult};

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Keeper calls awaited as a batch give up after this long.
pub const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_MAX_CREATE_ATTEMPTS: usize = 1000;
pub const DEFAULT_MAX_BLOCK_SIZE: usize = 65_409;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Namespace prepended to every table root. The engine refuses to build
    /// tables while this is unset.
    pub path_prefix: Option<String>,
    /// Upper bound for per-table key limits. `0` means no bound.
    pub keys_limit: u64,
    pub operation_timeout_ms: u64,
    /// Fail `attach` when the registration cannot be validated.
    pub strict_attach: bool,
    pub max_create_attempts: usize,
    /// Rows per block produced by a read shard.
    pub max_block_size: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            path_prefix: None,
            keys_limit: 0,
            operation_timeout_ms: DEFAULT_OPERATION_TIMEOUT_MS,
            strict_attach: false,
            max_create_attempts: DEFAULT_MAX_CREATE_ATTEMPTS,
            max_block_size: DEFAULT_MAX_BLOCK_SIZE,
        }
    }
}

impl EngineSettings {
    pub fn with_path_prefix(prefix: &str) -> Self {
        Self {
            path_prefix: Some(prefix.to_string()),
            ..Self::default()
        }
    }

    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let settings: EngineSettings = serde_json::from_str(&raw)?;
        Ok(settings)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn path_prefix(&self) -> TableResult<&str> {
        match self.path_prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => Ok(prefix),
            _ => Err(TableError::Configuration(
                "KeeperMap is disabled because 'path_prefix' config is not defined".to_string(),
            )),
        }
    }

    /// Clamps a requested per-table limit down to the engine-wide maximum.
    /// A request of `0` (unlimited) is left alone.
    pub fn effective_keys_limit(&self, requested: u64, table: &str) -> u64 {
        if self.keys_limit != 0 && requested > self.keys_limit {
            tracing::warn!(
                "Keys limit for {} defined by argument ({}) is larger than the one defined by 'keys_limit' config ({}). Will use config defined value",
                table,
                requested,
                self.keys_limit
            );
            self.keys_limit
        } else {
            if requested > 0 {
                tracing::info!("Keys limit for {} will be set to {}", table, requested);
            }
            requested
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSettings {
    /// Absolute keeper path, optionally prefixed with `name:` to pick an
    /// auxiliary keeper.
    pub root_path: String,
    #[serde(default = "default_true")]
    pub create_missing_root_path: bool,
    /// `0` means unlimited.
    #[serde(default)]
    pub keys_limit: u64,
}

impl TableSettings {
    pub fn new(root_path: &str) -> Self {
        Self {
            root_path: root_path.to_string(),
            create_missing_root_path: true,
            keys_limit: 0,
        }
    }

    pub fn with_keys_limit(mut self, keys_limit: u64) -> Self {
        self.keys_limit = keys_limit;
        self
    }

    pub fn with_create_missing_root_path(mut self, create: bool) -> Self {
        self.create_missing_root_path = create;
        self
    }
}
