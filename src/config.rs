//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** — `ESP_AT_SIM_BAUD`, `ESP_AT_SIM_LOG`
//! 2. **Config file** — path via `--config <path>`, or `esp-at-sim.toml` in CWD
//! 3. **Compiled defaults** — see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [server]
//! recv_chunk_size = 1024
//! cip_send_max = 2048
//! accept_backlog = 4
//! reset_boot_delay_ms = 500
//! shutdown_join_timeout_ms = 1000
//!
//! [serial]
//! default_baud = 115200
//!
//! [logging]
//! level = "info"
//! ```
//!
//! None of these knobs are wire-visible — the fixed constants and strings in
//! the command table are not configurable. This layer exists so the simulator
//! can be tuned for testing (e.g. a shorter boot delay) without touching the
//! engine.

use serde::Deserialize;
use std::path::Path;

use crate::error::SimError;

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Modem engine and TCP bridge tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Maximum bytes read per per-link receive (default 1024).
    #[serde(default = "default_recv_chunk_size")]
    pub recv_chunk_size: usize,
    /// Maximum `AT+CIPSEND` payload size; larger requests truncate (default 2048).
    #[serde(default = "default_cip_send_max")]
    pub cip_send_max: usize,
    /// Listener backlog (default 4).
    #[serde(default = "default_accept_backlog")]
    pub accept_backlog: u32,
    /// Delay before the `AT+RST` boot banner is emitted, in milliseconds (default 500).
    #[serde(default = "default_reset_boot_delay_ms")]
    pub reset_boot_delay_ms: u64,
    /// Bound on joining background tasks during shutdown, in milliseconds (default 1000).
    #[serde(default = "default_shutdown_join_timeout_ms")]
    pub shutdown_join_timeout_ms: u64,
}

/// Serial transport defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct SerialConfig {
    /// Baud rate used when the CLI doesn't specify one (default 115200).
    #[serde(default = "default_baud")]
    pub default_baud: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_recv_chunk_size() -> usize {
    1024
}
fn default_cip_send_max() -> usize {
    2048
}
fn default_accept_backlog() -> u32 {
    4
}
fn default_reset_boot_delay_ms() -> u64 {
    500
}
fn default_shutdown_join_timeout_ms() -> u64 {
    1000
}
fn default_baud() -> u32 {
    115_200
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            recv_chunk_size: default_recv_chunk_size(),
            cip_send_max: default_cip_send_max(),
            accept_backlog: default_accept_backlog(),
            reset_boot_delay_ms: default_reset_boot_delay_ms(),
            shutdown_join_timeout_ms: default_shutdown_join_timeout_ms(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            default_baud: default_baud(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            serial: SerialConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, reads that file and returns an error on failure.
    /// Otherwise looks for `esp-at-sim.toml` in the current directory, falling
    /// back to compiled defaults.
    pub fn load(path: Option<&str>) -> Result<Self, SimError> {
        let mut config = if let Some(p) = path {
            Self::from_file(p)?
        } else if Path::new("esp-at-sim.toml").exists() {
            Self::from_file("esp-at-sim.toml")?
        } else {
            Config::default()
        };

        if let Ok(baud) = std::env::var("ESP_AT_SIM_BAUD") {
            if let Ok(baud) = baud.parse() {
                config.serial.default_baud = baud;
            }
        }
        if let Ok(level) = std::env::var("ESP_AT_SIM_LOG") {
            config.logging.level = level;
        }

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, SimError> {
        let content = std::fs::read_to_string(path).map_err(|source| SimError::ConfigRead {
            path: path.to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| SimError::ConfigParse {
            path: path.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_wire_constants() {
        let config = Config::default();
        assert_eq!(config.server.cip_send_max, 2048);
        assert_eq!(config.server.reset_boot_delay_ms, 500);
        assert_eq!(config.serial.default_baud, 115_200);
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let toml = r#"
            [server]
            recv_chunk_size = 2048
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.recv_chunk_size, 2048);
        assert_eq!(config.server.cip_send_max, 2048);
    }
}
