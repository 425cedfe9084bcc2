//! TOML configuration
//!
//! Every field has a default, so a partial file (or none at all) works.
//! The default location is `<config dir>/spinroom.toml` as resolved by
//! `directories`; `--config` overrides it.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use spinroom_core::DEFAULT_HISTORY_CAPACITY;
use spinroom_net::server::{DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_MAX_CONNECTIONS};
use spinroom_net::backoff::{DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_DELAY_MS};
use spinroom_net::{ServerOptions, DEFAULT_PORT};
use tracing::info;

use crate::error::{Error, Result};
use crate::session::SessionOptions;

const CONFIG_FILE_NAME: &str = "spinroom.toml";

/// Window after `spinStarted` within which the result must arrive
pub const DEFAULT_SPIN_RESULT_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: IpAddr,
    pub port: u16,
    /// Connections allowed per (room, channel)
    pub max_connections_per_room: usize,
    /// Chat events retained per room for `since` replay
    pub chat_history_capacity: usize,
    pub heartbeat_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            max_connections_per_room: DEFAULT_MAX_CONNECTIONS,
            chat_history_capacity: DEFAULT_HISTORY_CAPACITY,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn options(&self) -> ServerOptions {
        ServerOptions {
            max_connections: self.max_connections_per_room,
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub spin_result_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconnect_base_delay_ms: DEFAULT_BASE_DELAY_MS,
            reconnect_max_delay_ms: DEFAULT_MAX_DELAY_MS,
            spin_result_timeout_ms: DEFAULT_SPIN_RESULT_TIMEOUT_MS,
        }
    }
}

impl ClientConfig {
    /// Session options pointed at `server_addr`
    pub fn session_options(&self, server_addr: SocketAddr) -> SessionOptions {
        SessionOptions {
            server_addr,
            reconnect_base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
            reconnect_max_delay: Duration::from_millis(self.reconnect_max_delay_ms),
            spin_result_timeout: Duration::from_millis(self.spin_result_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Used when RUST_LOG is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load from an explicit path, which must exist
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::ConfigNotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| Error::ConfigParse(format!("{}: {}", path.display(), e)))?;
        config.validate()?;

        info!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Load from `path` if given, else from the default location.
    /// A missing default file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }

        match default_config_path() {
            Some(path) if path.exists() => Self::load_from_path(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(Error::InvalidConfig("server.port must be non-zero".into()));
        }
        if self.server.max_connections_per_room == 0 {
            return Err(Error::InvalidConfig(
                "server.max_connections_per_room must be at least 1".into(),
            ));
        }
        if self.server.chat_history_capacity == 0 {
            return Err(Error::InvalidConfig(
                "server.chat_history_capacity must be at least 1".into(),
            ));
        }
        if self.server.heartbeat_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "server.heartbeat_interval_ms must be at least 1".into(),
            ));
        }
        if self.client.reconnect_base_delay_ms > self.client.reconnect_max_delay_ms {
            return Err(Error::InvalidConfig(
                "client.reconnect_base_delay_ms exceeds reconnect_max_delay_ms".into(),
            ));
        }
        if self.client.spin_result_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "client.spin_result_timeout_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Write this config as TOML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| Error::ConfigParse(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Platform config path, e.g. `~/.config/spinroom/spinroom.toml` on Linux
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("dev", "spinroom", "spinroom").map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}
