//! Configuration system for meshchat.
//!
//! Resolution order: environment variables → config file → defaults.
//! Positional command-line arguments are applied on top by the daemon.
//!
//! Config file location:
//!   1. $MESHCHAT_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/meshchat/config.toml
//!   3. ~/.config/meshchat/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::wire::DEFAULT_MAX_FRAME_LEN;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub identity: IdentityConfig,
    pub network: NetworkConfig,
    pub limits: LimitsConfig,
    pub shutdown: ShutdownConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Display name. Empty = prompt at startup.
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the listener binds to.
    pub listen_host: String,
    /// TCP listen port. 0 = OS-assigned.
    pub listen_port: u16,
    /// Host announced to peers in JOIN and PEER_LIST. Empty = listen_host.
    pub advertise_host: String,
    /// Upper bound on a single outbound dial.
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest frame payload accepted from a peer.
    pub max_frame_len: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long `exit` waits for session tasks before giving up on them.
    pub grace_ms: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_host: "127.0.0.1".to_string(),
            listen_port: 8080,
            advertise_host: String::new(),
            connect_timeout_ms: 5_000,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { grace_ms: 2_000 }
    }
}

impl NetworkConfig {
    /// Host to put in our own JOIN / PEER_LIST record.
    pub fn advertised_host(&self) -> &str {
        if self.advertise_host.is_empty() {
            &self.listen_host
        } else {
            &self.advertise_host
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl ShutdownConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("meshchat")
}

fn home_dir() -> PathBuf {
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
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl MeshConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            MeshConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("MESHCHAT_CONFIG")
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
            let text = toml::to_string_pretty(&MeshConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply MESHCHAT_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup; split out so tests need not touch
    /// the process environment.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("MESHCHAT_IDENTITY__NAME") {
            self.identity.name = v;
        }
        if let Some(v) = lookup("MESHCHAT_NETWORK__LISTEN_HOST") {
            self.network.listen_host = v;
        }
        if let Some(p) = lookup("MESHCHAT_NETWORK__LISTEN_PORT").and_then(|v| v.parse().ok()) {
            self.network.listen_port = p;
        }
        if let Some(v) = lookup("MESHCHAT_NETWORK__ADVERTISE_HOST") {
            self.network.advertise_host = v;
        }
        if let Some(n) = lookup("MESHCHAT_LIMITS__MAX_FRAME_LEN").and_then(|v| v.parse().ok()) {
            self.limits.max_frame_len = n;
        }
        if let Some(ms) = lookup("MESHCHAT_SHUTDOWN__GRACE_MS").and_then(|v| v.parse().ok()) {
            self.shutdown.grace_ms = ms;
        }
    }
}
