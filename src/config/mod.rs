//! umesh Configuration System
//!
//! Loads configuration from YAML files with a cascading priority system:
//! 1. `./umesh.yaml` (current directory - highest priority)
//! 2. `~/.umesh.yaml` (home directory)
//! 3. `~/.config/umesh/umesh.yaml` (user config directory)
//! 4. `/etc/umesh/umesh.yaml` (system - lowest priority)
//!
//! Files are merged key by key, so a higher priority file only needs the
//! values it changes:
//!
//! ```yaml
//! node:
//!   mode:
//!     super_capable: true
//!   router:
//!     kind: vector
//! ```

mod node;
mod transport;

use crate::identity::ExtAddr;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use node::{
    AddressOrder, AttachConfig, ForwarderConfig, LeaderEligibility, LeaderPolicyConfig,
    LimitsConfig, LowpowerConfig, ModeConfig, NetworkDataConfig, NodeConfig, RouterConfig,
    RouterKind, SecurityConfig, SecurityMode, TimingConfig, WhitelistEntryConfig,
};
pub use transport::UdpConfig;

/// Default config filename.
const CONFIG_FILENAME: &str = "umesh.yaml";

/// Smallest link MTU that still fits a full mesh header and one fragment.
pub const MIN_LINK_MTU: usize = 64;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseYaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("failed to merge configuration: {0}")]
    Merge(serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Identity configuration (`node.identity.*`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Extended address override (`node.identity.ext_addr`).
    /// If not specified, the HAL's MAC address is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext_addr: Option<ExtAddr>,
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Node configuration (`node.*`).
    #[serde(default)]
    pub node: NodeConfig,

    /// UDP radio emulation used by the daemon (`udp.*`).
    #[serde(default)]
    pub udp: UdpConfig,
}

impl Config {
    /// Create a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from the standard search paths.
    ///
    /// Returns a tuple of (config, paths_loaded) where paths_loaded contains
    /// the paths that were successfully loaded.
    pub fn load() -> Result<(Self, Vec<PathBuf>), ConfigError> {
        let search_paths = Self::search_paths();
        Self::load_from_paths(&search_paths)
    }

    /// Load configuration from specific paths.
    ///
    /// Paths are processed in order, with later paths overriding earlier ones.
    pub fn load_from_paths(paths: &[PathBuf]) -> Result<(Self, Vec<PathBuf>), ConfigError> {
        let mut merged = serde_yaml::Value::Null;
        let mut loaded_paths = Vec::new();

        for path in paths {
            if path.exists() {
                let value = Self::read_value(path)?;
                merge_values(&mut merged, value);
                loaded_paths.push(path.clone());
            }
        }

        let config: Config = if merged.is_null() {
            Config::default()
        } else {
            serde_yaml::from_value(merged).map_err(ConfigError::Merge)?
        };
        config.validate()?;
        Ok((config, loaded_paths))
    }

    /// Load configuration from a single file.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config =
            serde_yaml::from_str(&contents).map_err(|e| ConfigError::ParseYaml {
                path: path.to_path_buf(),
                source: e,
            })?;
        config.validate()?;
        Ok(config)
    }

    fn read_value(path: &Path) -> Result<serde_yaml::Value, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::ParseYaml {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Get the standard search paths in priority order (lowest to highest).
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        // System config (lowest priority)
        paths.push(PathBuf::from("/etc/umesh").join(CONFIG_FILENAME));

        // User config directory
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("umesh").join(CONFIG_FILENAME));
        }

        // Home directory
        if let Some(home_dir) = dirs::home_dir() {
            paths.push(home_dir.join(".umesh.yaml"));
        }

        // Current directory (highest priority)
        paths.push(PathBuf::from(".").join(CONFIG_FILENAME));

        paths
    }

    /// Reject values the protocol engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let node = &self.node;
        if node.timing.advertisement_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "node.timing.advertisement_interval_ms must be > 0".into(),
            ));
        }
        if node.timing.neighbor_alive_multiplier == 0 {
            return Err(ConfigError::Invalid(
                "node.timing.neighbor_alive_multiplier must be > 0".into(),
            ));
        }
        if node.attach.request_interval_ms < 2 {
            return Err(ConfigError::Invalid(
                "node.attach.request_interval_ms must be >= 2".into(),
            ));
        }
        if node.forwarder.hop_limit == 0 {
            return Err(ConfigError::Invalid("node.forwarder.hop_limit must be > 0".into()));
        }
        if node.lowpower.slots == 0 || node.lowpower.slot_interval_ms == 0 {
            return Err(ConfigError::Invalid("node.lowpower slots and interval must be > 0".into()));
        }
        if node.router.heartbeat_base_ms == 0
            || node.router.heartbeat_max_ms < node.router.heartbeat_base_ms
        {
            return Err(ConfigError::Invalid(
                "node.router heartbeat interval must satisfy 0 < base <= max".into(),
            ));
        }
        if usize::from(self.udp.mtu()) < MIN_LINK_MTU {
            return Err(ConfigError::Invalid(format!("udp.mtu must be >= {}", MIN_LINK_MTU)));
        }
        Ok(())
    }

    /// Serialize this configuration to YAML.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

/// Deep-merge `other` into `base`; mappings merge per key, anything else replaces.
fn merge_values(base: &mut serde_yaml::Value, other: serde_yaml::Value) {
    match (base, other) {
        (serde_yaml::Value::Mapping(base_map), serde_yaml::Value::Mapping(other_map)) => {
            for (key, value) in other_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (_, serde_yaml::Value::Null) => {}
        (base, other) => *base = other,
    }
}
