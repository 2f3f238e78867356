//! Engine configuration
//!
//! Loaded from a JSON file. Every field has a default, so a partial file (or
//! no file at all) yields a working configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tokio::fs;

/// Environment variable overriding `renumber_strategy`
pub const RENUMBER_ENV: &str = "BLOCKSPACE_RENUMBER";

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// How scopes are squashed back to `1..=N`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenumberStrategy {
    /// Let the storage adapter pick the fastest backend it supports
    #[default]
    Auto,
    /// Single `ROW_NUMBER() OVER` bulk update
    WindowRank,
    /// Read ordered ids, then point updates
    Portable,
}

impl FromStr for RenumberStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "window_rank" | "window-rank" | "window" => Ok(Self::WindowRank),
            "portable" => Ok(Self::Portable),
            other => Err(ConfigError::InvalidValue {
                key: "renumber_strategy".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub renumber_strategy: RenumberStrategy,

    /// How long a writer waits for the scope lock before reporting a collision
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Global cap on plugins per (container, language) scope
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_plugins_per_scope: Option<usize>,

    /// Per-type caps; override the behavior's own `max_per_scope`
    #[serde(default)]
    pub type_limits: HashMap<String, usize>,

    /// Slot name given to holding-area containers
    #[serde(default = "default_holding_area_slot")]
    pub holding_area_slot: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            renumber_strategy: RenumberStrategy::default(),
            busy_timeout_ms: default_busy_timeout_ms(),
            max_plugins_per_scope: None,
            type_limits: HashMap::new(),
            holding_area_slot: default_holding_area_slot(),
        }
    }
}

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

fn default_holding_area_slot() -> String {
    "clipboard".to_string()
}

impl EngineConfig {
    /// Load configuration from a JSON file
    ///
    /// A missing file is not an error: defaults are returned. The
    /// `BLOCKSPACE_RENUMBER` environment variable, when set, overrides the
    /// renumber strategy from the file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let mut config = if path.exists() {
            let contents = fs::read_to_string(path)
                .await
                .map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
            Self::from_json(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Self::default()
        };

        if let Ok(value) = std::env::var(RENUMBER_ENV) {
            config.renumber_strategy = value.parse()?;
        }

        Ok(config)
    }

    pub fn from_json(contents: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(contents)
    }

    /// Effective per-type limit, falling back to the behavior's own limit
    pub fn type_limit(&self, type_tag: &str, behavior_limit: Option<usize>) -> Option<usize> {
        self.type_limits.get(type_tag).copied().or(behavior_limit)
    }
}
