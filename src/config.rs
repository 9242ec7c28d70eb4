// Copyright 2025 Botforge (https://github.com/botforge-dev)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Hook engine configuration.

use crate::events::{HookKind, DEFAULT_HOOK_TIMEOUT_MS};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Configuration for the hook engine.
///
/// # Example JSON Configuration
///
/// ```json
/// {
///     "data_dir": "data/global",
///     "default_timeout_ms": 1000,
///     "timeout_overrides_ms": {"after_server_start": 5000},
///     "watch": true
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookEngineConfig {
    /// Data directory containing the `hooks/` tree.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Default per-script execution budget in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Per-kind budget overrides in milliseconds.
    #[serde(default)]
    pub timeout_overrides_ms: HashMap<HookKind, u64>,

    /// Whether to watch the hooks tree and invalidate the cache on changes.
    #[serde(default = "default_watch")]
    pub watch: bool,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data/global")
}

fn default_timeout_ms() -> u64 {
    DEFAULT_HOOK_TIMEOUT_MS
}

fn default_watch() -> bool {
    true
}

impl Default for HookEngineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            default_timeout_ms: default_timeout_ms(),
            timeout_overrides_ms: HashMap::new(),
            watch: default_watch(),
        }
    }
}

impl HookEngineConfig {
    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Parse a configuration from TOML.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Execution budget for a hook kind.
    pub fn timeout_for(&self, kind: HookKind) -> Duration {
        let ms = self
            .timeout_overrides_ms
            .get(&kind)
            .copied()
            .unwrap_or(self.default_timeout_ms);
        Duration::from_millis(ms)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("data_dir cannot be empty".to_string()));
        }
        if self.default_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "default_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if let Some((kind, _)) = self
            .timeout_overrides_ms
            .iter()
            .find(|&(_, &ms)| ms == 0)
        {
            return Err(ConfigError::Invalid(format!(
                "timeout override for {} must be greater than zero",
                kind.folder()
            )));
        }
        Ok(())
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
