//! Configuration module for mapscope
//!
//! This module handles engine configuration:
//! - Engine tunables (poll cadence, list/vector limits, instance capacity)
//! - Loading/saving the config as TOML or JSON
//! - Parsing host argument lists into device and endpoint directives
//!   (see [`directives`])
//!
//! # Config Location
//!
//! When no explicit path is given the config is looked up in the
//! platform-appropriate config directory under `mapscope`:
//!
//! - **Linux**: `~/.config/mapscope/config.toml`
//! - **macOS**: `~/Library/Application Support/mapscope/config.toml`
//! - **Windows**: `%APPDATA%\mapscope\config.toml`
//!
//! # Example
//!
//! ```ignore
//! use mapscope::config::EngineConfig;
//!
//! let config = EngineConfig::load_or_default(Some("mapscope.toml"));
//! assert!(config.poll_budget > 0);
//! ```

pub mod directives;

pub use directives::{DeviceArgs, EndpointArgs, InstanceDirective, PropertyDirective};

use crate::buffer::MAX_LIST;
use crate::error::{MapScopeError, Result};
use crate::types::StealMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application identifier for config directories
pub const APP_ID: &str = "mapscope";

/// Config filename
pub const CONFIG_FILE: &str = "config.toml";

/// Default poll interval in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1;

/// Default number of network poll iterations per tick
pub const DEFAULT_POLL_BUDGET: usize = 10;

/// Default maximum vector length an endpoint may declare
pub const DEFAULT_MAX_VECTOR_LENGTH: usize = 100;

/// Default number of simultaneously active instances per signal
pub const DEFAULT_INSTANCE_CAPACITY: usize = 16;

/// Default device name when no alias is given
pub const DEFAULT_DEVICE_NAME: &str = "mapscope";

/// Get the default config file path
pub fn default_config_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID).join(CONFIG_FILE))
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Delay between poll ticks in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Maximum network poll iterations per tick
    #[serde(default = "default_poll_budget")]
    pub poll_budget: usize,

    /// Maximum atoms in one host message
    #[serde(default = "default_max_list_length")]
    pub max_list_length: usize,

    /// Maximum vector length an endpoint may declare
    #[serde(default = "default_max_vector_length")]
    pub max_vector_length: usize,

    /// Simultaneously active instances per signal before overflow
    #[serde(default = "default_instance_capacity")]
    pub instance_capacity: usize,

    /// Overflow policy for new signals
    #[serde(default)]
    pub steal_mode: StealMode,

    /// Device name used when no alias is given
    #[serde(default = "default_device_name")]
    pub default_device_name: String,

    /// Polls before the loopback network reports ready
    #[serde(default = "default_ready_after_polls")]
    pub ready_after_polls: u32,
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_poll_budget() -> usize {
    DEFAULT_POLL_BUDGET
}

fn default_max_list_length() -> usize {
    MAX_LIST
}

fn default_max_vector_length() -> usize {
    DEFAULT_MAX_VECTOR_LENGTH
}

fn default_instance_capacity() -> usize {
    DEFAULT_INSTANCE_CAPACITY
}

fn default_device_name() -> String {
    DEFAULT_DEVICE_NAME.to_string()
}

fn default_ready_after_polls() -> u32 {
    3
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            poll_budget: DEFAULT_POLL_BUDGET,
            max_list_length: MAX_LIST,
            max_vector_length: DEFAULT_MAX_VECTOR_LENGTH,
            instance_capacity: DEFAULT_INSTANCE_CAPACITY,
            steal_mode: StealMode::None,
            default_device_name: DEFAULT_DEVICE_NAME.to_string(),
            ready_after_polls: default_ready_after_polls(),
        }
    }
}

impl EngineConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Poll interval as a Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Load a config file. `.json` files are parsed as JSON, anything else
    /// as TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MapScopeError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config: Self = if is_json(path) {
            serde_json::from_str(&content).map_err(|e| {
                MapScopeError::Config(format!("Failed to parse config file {:?}: {}", path, e))
            })?
        } else {
            toml::from_str(&content).map_err(|e| {
                MapScopeError::Config(format!("Failed to parse config file {:?}: {}", path, e))
            })?
        };
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, or from the default location when `None`,
    /// returning defaults on any error
    pub fn load_or_default(path: Option<impl AsRef<Path>>) -> Self {
        let path = match path {
            Some(p) => p.as_ref().to_path_buf(),
            None => match default_config_path() {
                Some(p) if p.exists() => p,
                _ => return Self::default(),
            },
        };
        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save the config, choosing the format from the extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                MapScopeError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = if is_json(path) {
            serde_json::to_string_pretty(self)
                .map_err(|e| MapScopeError::Serialization(e.to_string()))?
        } else {
            toml::to_string_pretty(self).map_err(|e| MapScopeError::Serialization(e.to_string()))?
        };

        std::fs::write(path, content).map_err(|e| {
            MapScopeError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.poll_budget == 0 {
            return Err(MapScopeError::Config("poll_budget must be > 0".to_string()));
        }
        if self.max_list_length == 0 {
            return Err(MapScopeError::Config("max_list_length must be > 0".to_string()));
        }
        if self.max_vector_length == 0 || self.max_vector_length > self.max_list_length {
            return Err(MapScopeError::Config(format!(
                "max_vector_length must be in 1..={}",
                self.max_list_length
            )));
        }
        if self.instance_capacity == 0 {
            return Err(MapScopeError::Config(
                "instance_capacity must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}
