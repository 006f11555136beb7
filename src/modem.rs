//! The modem actor: ties the transport, framer, and engine together and
//! owns the run loop that gives the concurrency model its ordering
//! guarantees (§5 — one response fully emitted before the next begins,
//! notifications interleaved only between responses).
//!
//! Following this codebase's dedicated-I/O-thread pattern (see
//! `transport::Transport::open_serial`), the modem itself is a single
//! async task: it is the one consumer of framer events and the one
//! producer that writes to the transport's outbound channel, so ordering
//! is structural rather than enforced by a lock.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::Config;
use crate::engine::{Engine, SideEffect, BOOT_BANNER};
use crate::framer::{Framer, FramerEvent};
use crate::state::ModemState;
use crate::transport::Transport;

/// Runs the modem against an already-open transport until it closes or
/// `shutdown` is signalled. This is the async equivalent of the teacher's
/// `modem_thread` — one task owns everything downstream of the transport.
pub struct Modem {
    transport: Transport,
    framer: Framer,
    engine: Engine,
    config: Arc<Config>,
}

impl Modem {
    pub fn new(transport: Transport, config: Arc<Config>) -> Self {
        let state = Arc::new(Mutex::new(ModemState::new()));
        let engine = Engine::new(state, transport.outbound.clone(), config.clone());
        Self {
            transport,
            framer: Framer::new(),
            engine,
            config,
        }
    }

    /// Drive the modem until the transport's inbound channel closes or
    /// `shutdown` resolves (e.g. on SIGINT/SIGTERM).
    pub async fn run(mut self, shutdown: impl std::future::Future<Output = ()>) {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("modem: shutdown signalled");
                    break;
                }

                maybe_bytes = self.transport.inbound.recv() => {
                    match maybe_bytes {
                        Some(bytes) => self.process_inbound(&bytes).await,
                        None => {
                            info!("modem: transport closed");
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn process_inbound(&mut self, bytes: &[u8]) {
        self.framer.push(bytes);
        while let Some(event) = self.framer.next_event() {
            match event {
                FramerEvent::Line(line) => {
                    let (response, effect) = self.engine.dispatch(&line).await;
                    if !response.is_empty() {
                        let _ = self.transport.outbound.send(response.into_bytes()).await;
                    }
                    match effect {
                        SideEffect::ArmRaw { link_id, size } => {
                            debug!("arming raw mode: link {link_id}, {size} bytes");
                            self.framer.arm_raw(link_id, size);
                        }
                        SideEffect::Reset => {
                            self.schedule_boot_banner();
                        }
                        SideEffect::None => {}
                    }
                }
                FramerEvent::Payload { link_id, data } => {
                    let response = self.engine.handle_send_payload(link_id, data).await;
                    if !response.is_empty() {
                        let _ = self.transport.outbound.send(response.into_bytes()).await;
                    }
                }
            }
        }
    }

    /// Post the boot banner onto the outbound transport after the
    /// configured delay, without blocking command processing (§4.5, §9).
    fn schedule_boot_banner(&self) {
        let outbound = self.transport.outbound.clone();
        let delay = Duration::from_millis(self.config.server.reset_boot_delay_ms);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = outbound.send(BOOT_BANNER.as_bytes().to_vec()).await;
        });
    }
}
