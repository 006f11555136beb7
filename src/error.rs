//! Typed errors for the handful of genuinely fallible, non-protocol operations:
//! opening the serial device and reading CLI/config input. The AT command
//! dispatch path never surfaces a Rust-level error — parse and precondition
//! failures are protocol-level outcomes (§7 of the design notes), handled as
//! plain responses, not exceptions.

use thiserror::Error;

/// Top-level error type returned by process bootstrap.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("failed to open serial port {device}: {source}")]
    SerialOpen {
        device: String,
        #[source]
        source: serialport::Error,
    },

    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("connection type '{0}' not implemented")]
    UnsupportedConnection(String),
}
