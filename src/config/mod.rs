//! Configuration module
//!
//! Handles loading and saving relay configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::network::{RelaySettings, ServerSettings};
use crate::protocol::{DEFAULT_HEIGHT, DEFAULT_PORT, DEFAULT_WIDTH};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Listener settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Board settings sent to players
    #[serde(default)]
    pub game: GameConfig,

    /// Relay loop settings
    #[serde(default)]
    pub relay: RelayConfig,
}

/// General configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Enable verbose logging
    #[serde(default)]
    pub verbose: bool,
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Board configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
}

fn default_width() -> u32 {
    DEFAULT_WIDTH
}

fn default_height() -> u32 {
    DEFAULT_HEIGHT
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
        }
    }
}

/// Relay configuration. Both timeouts are off unless set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Close a player nobody pairs with after this long (ms)
    pub opponent_timeout_ms: Option<u64>,
    /// Close a paired player that stops sending for this long (ms)
    pub idle_timeout_ms: Option<u64>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("pong-relay/config.toml")),
            Some(PathBuf::from("./pong-relay.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    /// Like `load_default`, but a broken file falls back to defaults. The error
    /// is handed back so the caller can report it once logging is up.
    pub fn load_default_or_report() -> (Self, Option<ConfigError>) {
        Self::or_default(Self::load_default())
    }

    fn or_default(result: ConfigResult<Self>) -> (Self, Option<ConfigError>) {
        match result {
            Ok(config) => (config, None),
            Err(e) => (Self::default(), Some(e)),
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Settings for the server and its relays
    pub fn server_settings(&self) -> ServerSettings {
        ServerSettings::new(self.server.host.clone(), self.server.port).with_relay(RelaySettings {
            width: self.game.width,
            height: self.game.height,
            opponent_timeout: self.relay.opponent_timeout_ms.map(Duration::from_millis),
            idle_timeout: self.relay.idle_timeout_ms.map(Duration::from_millis),
        })
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> ConfigResult<String> {
    let config = Config {
        server: ServerConfig {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        },
        relay: RelayConfig {
            opponent_timeout_ms: Some(60_000),
            idle_timeout_ms: Some(10_000),
        },
        ..Default::default()
    };

    Ok(toml::to_string_pretty(&config)?)
}
