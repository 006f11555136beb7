#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::unused_async)]

//! esp-at-sim library — an ESP8266-class Wi-Fi AT-command modem simulator.
//!
//! A host device drives the modem over a serial link with line-oriented AT
//! commands; this library answers with the firmware's well-known textual
//! responses and, when asked to run a TCP server, bridges the serial side
//! to real TCP sockets on the host machine.
//!
//! - `transport` — duplex byte channel to the host (real serial or loopback)
//! - `framer` — command/raw-mode byte framing
//! - `engine` — the AT command dispatcher and modem state machine
//! - `bridge` — the TCP server and per-link socket plumbing
//! - `modem` — the actor wiring the above together
//! - `state` — shared modem state and the fixed-capacity connection table
//! - `config` — layered configuration
//! - `error` — typed bootstrap errors

pub mod bridge;
pub mod config;
pub mod engine;
pub mod error;
pub mod framer;
pub mod modem;
pub mod state;
pub mod transport;

pub use config::Config;
pub use error::SimError;
pub use modem::Modem;
