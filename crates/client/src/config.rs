//! Client configuration management

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ClientError, Result};

/// Tunables for daemon connections and serial sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub daemon: DaemonSettings,
    #[serde(default)]
    pub serial: SerialSettings,
}

/// Settings governing the daemon-facing socket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonSettings {
    /// TCP port of the usbipd daemon
    pub port: u16,
    /// Budget for establishing the TCP connection
    pub connect_timeout_ms: u64,
    /// Per-recv timeout on blocking reads; outer loops apply their own
    /// deadlines on top of this
    pub socket_read_timeout_ms: u64,
    /// Budget for protocol overhead (list and import can run long)
    pub usbip_timeout_ms: u64,
}

/// Settings governing an attached device session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialSettings {
    /// Default wait for pieces of a payload
    pub payload_timeout_ms: u64,
    /// Number of bytes of pending reads to keep enqueued
    pub read_buffer_size: usize,
    /// Refill the read queue when pending reads drop below this
    pub urb_queue_min: usize,
    /// Upper bound of queued reads after a refill
    pub urb_queue_max: usize,
    /// Line terminator for delimiter reads
    pub delimiter: String,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            port: protocol::DEFAULT_PORT,
            connect_timeout_ms: 1_000,
            socket_read_timeout_ms: 5,
            usbip_timeout_ms: 10_000,
        }
    }
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            payload_timeout_ms: 250,
            read_buffer_size: 512,
            urb_queue_min: 10,
            urb_queue_max: 50,
            delimiter: "\r\n".to_string(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            daemon: DaemonSettings::default(),
            serial: SerialSettings::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from the specified path, or from the default
    /// location when none is given.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p,
            None => {
                let default = Self::default_path();
                if !default.exists() {
                    return Err(ClientError::Config(
                        "no configuration file found".to_string(),
                    ));
                }
                default
            }
        };

        let content = fs::read_to_string(&config_path).map_err(|e| {
            ClientError::Config(format!(
                "failed to read config file {}: {e}",
                config_path.display()
            ))
        })?;

        let config: ClientConfig = toml::from_str(&content).map_err(|e| {
            ClientError::Config(format!(
                "failed to parse config file {}: {e}",
                config_path.display()
            ))
        })?;

        config.validate()?;

        tracing::info!("loaded configuration from {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or fall back to defaults.
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("failed to load config: {e}, using defaults");
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ClientError::Config(format!("failed to serialize configuration: {e}")))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                ClientError::Config(format!(
                    "failed to create config directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        fs::write(path, content).map_err(|e| {
            ClientError::Config(format!("failed to write config file {}: {e}", path.display()))
        })?;

        tracing::info!("saved configuration to {}", path.display());
        Ok(())
    }

    /// Default configuration file path.
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usbip-serial").join("client.toml")
        } else {
            PathBuf::from(".config/usbip-serial/client.toml")
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.daemon.connect_timeout_ms == 0 || self.daemon.usbip_timeout_ms == 0 {
            return Err(ClientError::Config(
                "daemon timeouts must be nonzero".to_string(),
            ));
        }
        if self.serial.payload_timeout_ms == 0 {
            return Err(ClientError::Config(
                "payload timeout must be nonzero".to_string(),
            ));
        }
        if self.serial.urb_queue_min >= self.serial.urb_queue_max {
            return Err(ClientError::Config(format!(
                "urb_queue_min {} must be below urb_queue_max {}",
                self.serial.urb_queue_min, self.serial.urb_queue_max
            )));
        }
        if self.serial.delimiter.is_empty() {
            return Err(ClientError::Config(
                "delimiter must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.daemon.connect_timeout_ms)
    }

    pub fn socket_read_timeout(&self) -> Duration {
        Duration::from_millis(self.daemon.socket_read_timeout_ms)
    }

    pub fn usbip_timeout(&self) -> Duration {
        Duration::from_millis(self.daemon.usbip_timeout_ms)
    }

    pub fn payload_timeout(&self) -> Duration {
        Duration::from_millis(self.serial.payload_timeout_ms)
    }
}
