//! Runtime Configuration
//!
//! Host settings come from the environment (a `.env` file is loaded by the
//! binary first). Match rules can be overridden with a JSON
//! [`GameSettings`] file.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::game::state::GameSettings;
use crate::network::codec::WireFormat;
use crate::network::host::DEFAULT_BROADCAST_INTERVAL_MS;

/// Listen address, also the room name observers join.
pub const ENV_BIND_ADDR: &str = "TANK_BIND_ADDR";
/// Simulation ticks per second.
pub const ENV_TICK_RATE: &str = "TANK_TICK_RATE";
/// Minimum spacing between broadcasts.
pub const ENV_BROADCAST_INTERVAL_MS: &str = "TANK_BROADCAST_INTERVAL_MS";
/// `text` or `binary`.
pub const ENV_WIRE_FORMAT: &str = "TANK_WIRE_FORMAT";
/// Path to a JSON `GameSettings` file.
pub const ENV_SETTINGS_FILE: &str = "TANK_SETTINGS_FILE";

/// Configuration failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable did not parse.
    #[error("{name}: invalid value {value:?}")]
    InvalidVar {
        /// Variable name
        name: &'static str,
        /// Value as found
        value: String,
    },

    /// Settings file unreadable.
    #[error("Cannot read {}: {source}", path.display())]
    Io {
        /// Settings file
        path: PathBuf,
        /// Read failure
        #[source]
        source: std::io::Error,
    },

    /// Settings file is not valid JSON settings.
    #[error("Invalid settings in {}: {source}", path.display())]
    Settings {
        /// Settings file
        path: PathBuf,
        /// Parse failure
        #[source]
        source: serde_json::Error,
    },
}

/// Host configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Listen address
    pub bind_addr: SocketAddr,
    /// Ticks per second
    pub tick_rate: u32,
    /// Minimum milliseconds between broadcasts
    pub broadcast_interval_ms: u64,
    /// Outbound wire format
    pub wire_format: WireFormat,
    /// Maximum concurrent observers
    pub max_connections: usize,
    /// Match rules
    pub settings: GameSettings,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            tick_rate: 60,
            broadcast_interval_ms: DEFAULT_BROADCAST_INTERVAL_MS,
            wire_format: WireFormat::Text,
            max_connections: 16,
            settings: GameSettings::default(),
        }
    }
}

impl HostConfig {
    /// Read from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read through `lookup`; unset variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_BIND_ADDR) {
            config.bind_addr = parse_var(ENV_BIND_ADDR, value)?;
        }
        if let Some(value) = lookup(ENV_TICK_RATE) {
            let rate: u32 = parse_var(ENV_TICK_RATE, value.clone())?;
            if rate == 0 {
                return Err(ConfigError::InvalidVar { name: ENV_TICK_RATE, value });
            }
            config.tick_rate = rate;
        }
        if let Some(value) = lookup(ENV_BROADCAST_INTERVAL_MS) {
            config.broadcast_interval_ms = parse_var(ENV_BROADCAST_INTERVAL_MS, value)?;
        }
        if let Some(value) = lookup(ENV_WIRE_FORMAT) {
            config.wire_format = parse_var(ENV_WIRE_FORMAT, value)?;
        }
        if let Some(path) = lookup(ENV_SETTINGS_FILE) {
            config.settings = load_settings(Path::new(&path))?;
        }
        Ok(config)
    }

    /// Time between ticks.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.tick_rate.max(1) as u64)
    }
}

/// Load match rules from a JSON file. Missing fields keep their defaults.
pub fn load_settings(path: &Path) -> Result<GameSettings, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Settings {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_var<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidVar { name, value })
}
