//! Simulation configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (ROOMS_*)
//! - TOML configuration file
//! - The persisted preferences file (`max_rooms_open`)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tenvis_rooms_core::{ManagerConfig, DEFAULT_MAX_ROOMS_OPEN};
use tracing::debug;

/// Simulation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Session manager settings.
    #[serde(default)]
    pub rooms: RoomsConfig,

    /// Scripted session settings.
    #[serde(default)]
    pub simulation: SimulationConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Session manager settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomsConfig {
    /// Rooms kept open when no preference is stored.
    #[serde(default = "default_max_rooms_open")]
    pub max_rooms_open: usize,

    /// Preferences file holding the user's `max_rooms_open`.
    #[serde(default = "default_preferences")]
    pub preferences: String,
}

/// Scripted session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Number of rooms opened, one after another.
    #[serde(default = "default_room_count")]
    pub rooms: usize,

    /// Messages streamed into every open room.
    #[serde(default = "default_messages_per_room")]
    pub messages_per_room: usize,

    /// Artificial latency of the inbound hook chain in milliseconds.
    #[serde(default)]
    pub hook_delay_ms: u64,

    /// Drop and restore connectivity at the end of the run.
    #[serde(default = "default_true")]
    pub reconnect: bool,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default)]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_max_rooms_open() -> usize {
    std::env::var("ROOMS_MAX_OPEN")
        .ok()
        .and_then(|n| n.parse().ok())
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_MAX_ROOMS_OPEN)
}

fn default_preferences() -> String {
    "~/.config/rooms/preferences.toml".to_string()
}

fn default_room_count() -> usize {
    7
}

fn default_messages_per_room() -> usize {
    3
}

fn default_true() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rooms: RoomsConfig::default(),
            simulation: SimulationConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            max_rooms_open: default_max_rooms_open(),
            preferences: default_preferences(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            rooms: default_room_count(),
            messages_per_room: default_messages_per_room(),
            hook_delay_ms: 0,
            reconnect: true,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "rooms.toml",
            "/etc/rooms/rooms.toml",
            "~/.config/rooms/rooms.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Session manager configuration.
    ///
    /// A stored preference wins over the config file. The preference is read
    /// once, here.
    #[must_use]
    pub fn manager_config(&self) -> ManagerConfig {
        match read_preference(&self.rooms.preferences) {
            Some(raw) => {
                debug!(preference = %raw, "Using stored max_rooms_open preference");
                ManagerConfig::from_preference(Some(&raw))
            }
            None => ManagerConfig::from_preference(Some(&self.rooms.max_rooms_open.to_string())),
        }
    }
}

/// Raw `max_rooms_open` value from a preferences file, if one is stored.
fn read_preference(path: &str) -> Option<String> {
    let expanded = shellexpand::tilde(path);
    let contents = std::fs::read_to_string(expanded.as_ref()).ok()?;
    preference_value(&contents)
}

fn preference_value(contents: &str) -> Option<String> {
    let table: toml::Table = match toml::from_str(contents) {
        Ok(table) => table,
        // An unreadable preferences file counts as a bad value, not as absent.
        Err(_) => return Some(String::new()),
    };
    match table.get("max_rooms_open")? {
        toml::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
