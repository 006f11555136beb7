//! Duplex byte channel between the host and the protocol engine.
//!
//! Whether the bytes come from a real serial device or a loopback fed by a
//! test is opaque to everything above this module — both constructors
//! produce the same `Transport` handle (an `mpsc` pair), following this
//! codebase's `modem::Modem` pattern: a dedicated blocking I/O thread owns
//! the device, and callers talk to it over channels instead of a mutex.

use std::io::{Read, Write};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::SimError;

/// Read buffer size for the serial reader thread.
const READ_BUF_SIZE: usize = 1024;

/// Handle to a duplex byte channel feeding the protocol engine.
///
/// `inbound` yields chunks read from the host; `outbound` is cloned and
/// handed to every producer of host-bound bytes (the engine's responses, the
/// bridge's `+IPD`/`CONNECT` notifications, the deferred boot banner).
pub struct Transport {
    pub inbound: mpsc::Receiver<Vec<u8>>,
    pub outbound: mpsc::Sender<Vec<u8>>,
}

impl Transport {
    /// Open a real serial device and spawn the reader/writer threads.
    pub fn open_serial(device: &str, baud: u32) -> Result<Self, SimError> {
        let port = serialport::new(device, baud)
            .timeout(std::time::Duration::from_millis(100))
            .open()
            .map_err(|source| SimError::SerialOpen {
                device: device.to_string(),
                source,
            })?;

        let (inbound_tx, inbound_rx) = mpsc::channel::<Vec<u8>>(64);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Vec<u8>>(64);

        let mut reader = port
            .try_clone()
            .map_err(|source| SimError::SerialOpen {
                device: device.to_string(),
                source,
            })?;
        let dev_name = device.to_string();
        std::thread::Builder::new()
            .name(format!("serial-rx-{dev_name}"))
            .spawn(move || {
                let mut buf = [0u8; READ_BUF_SIZE];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => continue,
                        Ok(n) => {
                            debug!("serial {dev_name}: read {n} bytes");
                            if inbound_tx.blocking_send(buf[..n].to_vec()).is_err() {
                                break;
                            }
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                        Err(e) => {
                            warn!("serial {dev_name}: read error: {e}");
                            break;
                        }
                    }
                }
                info!("serial {dev_name}: reader thread exiting");
            })
            .expect("spawn serial reader thread");

        let mut writer = port;
        let dev_name = device.to_string();
        std::thread::Builder::new()
            .name(format!("serial-tx-{dev_name}"))
            .spawn(move || {
                while let Some(chunk) = outbound_rx.blocking_recv() {
                    if let Err(e) = writer.write_all(&chunk) {
                        warn!("serial {dev_name}: write error: {e}");
                        break;
                    }
                    let _ = writer.flush();
                }
                info!("serial {dev_name}: writer thread exiting");
            })
            .expect("spawn serial writer thread");

        info!("serial {device}: opened ({baud} 8N1)");

        Ok(Self {
            inbound: inbound_rx,
            outbound: outbound_tx,
        })
    }

    /// In-memory transport pair for tests: returns the engine-facing
    /// `Transport` plus a `LoopbackPeer` the test drives as the "host".
    pub fn loopback() -> (Self, LoopbackPeer) {
        let (host_to_engine_tx, host_to_engine_rx) = mpsc::channel::<Vec<u8>>(64);
        let (engine_to_host_tx, engine_to_host_rx) = mpsc::channel::<Vec<u8>>(64);

        let transport = Self {
            inbound: host_to_engine_rx,
            outbound: engine_to_host_tx,
        };
        let peer = LoopbackPeer {
            to_engine: host_to_engine_tx,
            from_engine: engine_to_host_rx,
        };
        (transport, peer)
    }
}

/// Test double standing in for the host side of a loopback `Transport`.
pub struct LoopbackPeer {
    to_engine: mpsc::Sender<Vec<u8>>,
    from_engine: mpsc::Receiver<Vec<u8>>,
}

impl LoopbackPeer {
    pub async fn send(&self, bytes: &[u8]) {
        self.to_engine
            .send(bytes.to_vec())
            .await
            .expect("engine transport closed");
    }

    /// Receive the next chunk the engine wrote to the host.
    pub async fn recv(&mut self) -> Vec<u8> {
        self.from_engine
            .recv()
            .await
            .expect("engine transport closed")
    }

    /// Receive and accumulate bytes until at least `len` bytes have arrived,
    /// returning exactly that much (buffering any surplus for the next call
    /// is not needed by current tests, so this simply asserts on exact sizing
    /// at the call site).
    pub async fn recv_at_least(&mut self, len: usize) -> Vec<u8> {
        let mut acc = Vec::new();
        while acc.len() < len {
            acc.extend(self.recv().await);
        }
        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loopback_round_trips_bytes() {
        let (mut transport, peer) = Transport::loopback();
        peer.send(b"AT\r\n").await;
        let received = transport.inbound.recv().await.unwrap();
        assert_eq!(received, b"AT\r\n");

        transport
            .outbound
            .send(b"\r\n\r\nOK\r\n".to_vec())
            .await
            .unwrap();
        drop(transport);
        let mut peer = peer;
        let echoed = peer.recv().await;
        assert_eq!(echoed, b"\r\n\r\nOK\r\n");
    }
}
