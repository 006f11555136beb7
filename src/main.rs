#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # esp-at-sim
//!
//! ESP8266-class Wi-Fi AT-command modem simulator.
//!
//! Drives a serial port with the classic ESP8266 "AT" firmware's command
//! set and bridges `AT+CIPSERVER`/`AT+CIPSEND`/`AT+CIPCLOSE` to real TCP
//! sockets on this machine, so firmware written against a real ESP8266 can
//! be developed and tested against this process instead.
//!
//! ## Usage
//!
//! - `esp-at-sim serial <PORT> [BAUD]` — run the modem against a serial device
//! - `esp-at-sim list-ports` (or no subcommand) — list available serial ports

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use esp_at_sim::config::Config;
use esp_at_sim::error::SimError;
use esp_at_sim::modem::Modem;
use esp_at_sim::transport::Transport;

/// ESP8266-class Wi-Fi AT-command modem simulator.
///
/// Takes the connection kind as a free-form first argument rather than a
/// fixed set of subcommands, so an unrecognized kind can be reported with
/// its own name in a "not implemented" message instead of clap's generic
/// usage error (§6).
#[derive(Parser)]
#[command(name = "esp-at-sim", version)]
struct Cli {
    /// Connection kind: "serial" or "list-ports". Omit to list ports.
    connection: Option<String>,

    /// Serial device path and optional baud rate, when `connection` is "serial".
    args: Vec<String>,

    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("esp-at-sim: {e}");
            std::process::exit(1);
        }
    };

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    match cli.connection.as_deref() {
        Some("serial") => {
            let Some(port) = cli.args.first() else {
                eprintln!("esp-at-sim: usage: esp-at-sim serial <port> [baud]");
                std::process::exit(1);
            };
            let baud = cli
                .args
                .get(1)
                .and_then(|b| b.parse().ok())
                .unwrap_or(config.serial.default_baud);
            run_serial(port, baud, Arc::new(config)).await;
        }
        Some("list-ports") | None => {
            list_ports();
        }
        Some(other) => {
            let err = SimError::UnsupportedConnection(other.to_string());
            eprintln!("esp-at-sim: {err}");
            std::process::exit(1);
        }
    }
}

async fn run_serial(port: &str, baud: u32, config: Arc<Config>) {
    info!("esp-at-sim v{} starting", env!("CARGO_PKG_VERSION"));

    let transport = match Transport::open_serial(port, baud) {
        Ok(t) => t,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    let modem = Modem::new(transport, config);

    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => info!("received SIGINT"),
                _ = sigterm.recv() => info!("received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            info!("received SIGINT");
        }
    };

    modem.run(shutdown).await;
    info!("esp-at-sim: shut down");
}

fn list_ports() {
    match serialport::available_ports() {
        Ok(ports) if !ports.is_empty() => {
            println!("Available serial ports:");
            for p in ports {
                println!("  {}", p.port_name);
            }
        }
        Ok(_) => {
            eprintln!("esp-at-sim: no serial ports found");
        }
        Err(e) => {
            eprintln!("esp-at-sim: failed to enumerate serial ports: {e}");
        }
    }
    std::process::exit(1);
}
