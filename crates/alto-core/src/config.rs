//! Configuration system for the ALTO directory.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $ALTO_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/alto/config.toml
//!   3. ~/.config/alto/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::wire::{DEFAULT_PORT, MAX_FRAME_LENGTH};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AltoConfig {
    pub network: NetworkConfig,
    pub registry: RegistryConfig,
    pub persistence: PersistenceConfig,
    pub cost: CostWeights,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the session listener binds to.
    pub bind_addr: String,
    /// TCP port for client sessions. 0 = OS-assigned.
    pub port: u16,
    /// Local HTTP status port. 0 = disabled.
    pub api_port: u16,
    /// Max concurrently served connections.
    pub max_connections: usize,
    /// Max frame payload accepted from clients.
    pub max_frame_length: usize,
    /// Close sessions idle for this long. 0 = never.
    pub idle_timeout_secs: u64,
    /// Malformed frames in a row before a session is closed.
    pub max_consecutive_malformed: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Drop peers not heard from within N seconds. 0 = never.
    pub peer_ttl_secs: u64,
    /// How often the expiry sweep runs.
    pub expiry_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Topology snapshot loaded at startup.
    pub topology_path: PathBuf,
    /// Peer table loaded at startup and rewritten on mutation.
    pub peers_path: PathBuf,
    /// Rewrite the peer table after every registry mutation.
    pub write_through: bool,
}

/// Weights of the default cost policy.
///
/// score = hop_weight * hops / hop_scale
///       + bandwidth_weight * bandwidth_reference / bottleneck_bandwidth
///       + delay_weight * total_delay / delay_scale
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostWeights {
    pub hop_weight: f64,
    pub bandwidth_weight: f64,
    pub delay_weight: f64,
    pub hop_scale: f64,
    pub bandwidth_reference: f64,
    pub delay_scale: f64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            api_port: 0,
            max_connections: 256,
            max_frame_length: MAX_FRAME_LENGTH,
            idle_timeout_secs: 300,
            max_consecutive_malformed: 16,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            peer_ttl_secs: 0,
            expiry_interval_secs: 5,
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            topology_path: data_dir().join("topology.json"),
            peers_path: data_dir().join("peers.json"),
            write_through: true,
        }
    }
}

impl Default for CostWeights {
    fn default() -> Self {
        Self {
            hop_weight: 0.6,
            bandwidth_weight: 0.2,
            delay_weight: 0.2,
            hop_scale: 1.0,
            bandwidth_reference: 100.0,
            delay_scale: 100.0,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("alto")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("alto")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid setting {0}: {1}")]
    Invalid(&'static str, String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl AltoConfig {
    /// Load config: env vars → file → defaults. The result is validated.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            AltoConfig::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file without env overrides.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("ALTO_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&AltoConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Reject settings the daemon cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "network.max_connections",
                "must be at least 1".into(),
            ));
        }
        if self.network.max_frame_length == 0 {
            return Err(ConfigError::Invalid(
                "network.max_frame_length",
                "must be at least 1".into(),
            ));
        }
        if self.registry.peer_ttl_secs > 0 && self.registry.expiry_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "registry.expiry_interval_secs",
                "must be non-zero when peer_ttl_secs is set".into(),
            ));
        }
        self.cost.validate()
    }

    /// Apply ALTO_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("ALTO_NETWORK__BIND_ADDR") {
            self.network.bind_addr = v;
        }
        if let Ok(v) = std::env::var("ALTO_NETWORK__PORT") {
            if let Ok(p) = v.parse() {
                self.network.port = p;
            }
        }
        if let Ok(v) = std::env::var("ALTO_NETWORK__API_PORT") {
            if let Ok(p) = v.parse() {
                self.network.api_port = p;
            }
        }
        if let Ok(v) = std::env::var("ALTO_NETWORK__MAX_CONNECTIONS") {
            if let Ok(n) = v.parse() {
                self.network.max_connections = n;
            }
        }
        if let Ok(v) = std::env::var("ALTO_REGISTRY__PEER_TTL_SECS") {
            if let Ok(n) = v.parse() {
                self.registry.peer_ttl_secs = n;
            }
        }
        if let Ok(v) = std::env::var("ALTO_PERSISTENCE__TOPOLOGY_PATH") {
            self.persistence.topology_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ALTO_PERSISTENCE__PEERS_PATH") {
            self.persistence.peers_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ALTO_PERSISTENCE__WRITE_THROUGH") {
            self.persistence.write_through = v == "true" || v == "1";
        }
    }
}

impl CostWeights {
    /// Weights must be finite and non-negative, scales strictly positive.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, w) in [
            ("cost.hop_weight", self.hop_weight),
            ("cost.bandwidth_weight", self.bandwidth_weight),
            ("cost.delay_weight", self.delay_weight),
        ] {
            if !w.is_finite() || w < 0.0 {
                return Err(ConfigError::Invalid(name, format!("{w} is not a non-negative number")));
            }
        }
        for (name, s) in [
            ("cost.hop_scale", self.hop_scale),
            ("cost.bandwidth_reference", self.bandwidth_reference),
            ("cost.delay_scale", self.delay_scale),
        ] {
            if !s.is_finite() || s <= 0.0 {
                return Err(ConfigError::Invalid(name, format!("{s} is not a positive number")));
            }
        }
        if self.hop_weight + self.bandwidth_weight + self.delay_weight == 0.0 {
            return Err(ConfigError::Invalid("cost", "all weights are zero".into()));
        }
        Ok(())
    }
}
