//! TCP bridge: owns the listening socket while server mode is enabled,
//! accepts clients into the fixed connection table, and ferries bytes
//! between each socket and the serial-facing outbound channel.
//!
//! Every task spawned here (the accept loop, each per-link read loop) is
//! cancelled by aborting its `JoinHandle` rather than by cooperative
//! polling — `tokio::net` futures are cancel-safe, so an abort takes effect
//! at the task's next await point, which is always inside a read or accept
//! call. This mirrors `ConnectionSlot::shutdown` aborting `reader_task`.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::state::{ConnectionSlot, ModemState, PendingReceive};

/// Attempt to start listening on `127.0.0.1:port` and spawn the accept loop.
/// Returns `true` on success; on any failure the caller emits `ERROR\r\n`
/// and leaves `cip_server` at 0. On success, the accept task handle is
/// stored on `ModemState` for `stop_server`/`reset` to tear down later.
pub async fn start_server(
    state: &Arc<Mutex<ModemState>>,
    outbound: mpsc::Sender<Vec<u8>>,
    port: u16,
    config: &ServerConfig,
) -> bool {
    if !port_available(port) {
        warn!("CIPSERVER: port {port} already in use");
        return false;
    }

    let listener = match TcpListener::bind(("127.0.0.1", port)).await {
        Ok(l) => l,
        Err(e) => {
            warn!("CIPSERVER: bind 127.0.0.1:{port} failed: {e}");
            return false;
        }
    };

    info!("CIPSERVER: listening on 127.0.0.1:{port}");

    let loop_state = state.clone();
    let chunk_size = config.recv_chunk_size;
    let task = tokio::spawn(accept_loop(listener, loop_state, outbound, chunk_size));

    let mut guard = state.lock().await;
    guard.accept_task = Some(task);
    true
}

async fn accept_loop(
    listener: TcpListener,
    state: Arc<Mutex<ModemState>>,
    outbound: mpsc::Sender<Vec<u8>>,
    chunk_size: usize,
) {
    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("CIPSERVER: accept error: {e}");
                continue;
            }
        };

        let link_id = {
            let guard = state.lock().await;
            guard.free_slot()
        };

        let Some(link_id) = link_id else {
            debug!("CIPSERVER: connection table full, rejecting {peer}");
            drop(socket);
            continue;
        };

        let (read_half, write_half) = socket.into_split();
        let reader_outbound = outbound.clone();
        let reader_state = state.clone();
        let reader_task = tokio::spawn(link_read_loop(
            link_id,
            read_half,
            reader_state,
            reader_outbound,
            chunk_size,
        ));

        {
            let mut guard = state.lock().await;
            guard.connections[link_id] = Some(ConnectionSlot {
                writer: write_half,
                reader_task,
            });
        }

        info!("link {link_id}: accepted {peer}");
        let _ = outbound
            .send(format!("{link_id},CONNECT\r\n\r\n").into_bytes())
            .await;
    }
}

async fn link_read_loop(
    link_id: usize,
    mut read_half: tokio::net::tcp::OwnedReadHalf,
    state: Arc<Mutex<ModemState>>,
    outbound: mpsc::Sender<Vec<u8>>,
    chunk_size: usize,
) {
    let mut buf = vec![0u8; chunk_size.max(1)];
    loop {
        let n = match read_half.read(&mut buf).await {
            Ok(0) => {
                debug!("link {link_id}: EOF");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                debug!("link {link_id}: read error: {e}");
                break;
            }
        };

        let chunk = buf[..n].to_vec();
        let _ = outbound
            .send(format!("+IPD,{link_id},{n}\r\n").into_bytes())
            .await;

        let mut guard = state.lock().await;
        if guard.pending_receive.is_none() {
            guard.pending_receive = Some(PendingReceive {
                link_id,
                size: chunk.len(),
                buffer: chunk,
            });
        } else {
            guard.dropped_receive_chunks += 1;
            debug!(
                "link {link_id}: dropped {n} bytes, pending_receive already occupied (total dropped: {})",
                guard.dropped_receive_chunks
            );
        }
    }

    // Clear our own slot on exit; abandon any pending_send targeting us.
    // Never called from within itself — only the accept loop installs a slot.
    let mut guard = state.lock().await;
    if guard.slot_open(link_id) {
        guard.connections[link_id] = None;
    }
    if matches!(&guard.pending_send, Some(p) if p.link_id == link_id) {
        guard.pending_send = None;
    }
}

/// Stop accepting, close the listener (by aborting the accept task, which
/// owns it), and tear down every occupied slot.
pub async fn stop_server(state: &Arc<Mutex<ModemState>>) {
    let (slots, accept_task) = {
        let mut guard = state.lock().await;
        guard.cip_server = 0;
        guard.take_connections()
    };

    if let Some(task) = accept_task {
        task.abort();
    }
    for slot in slots.into_iter().flatten() {
        slot.shutdown().await;
    }
}

/// Close a single link's socket (`AT+CIPCLOSE`). Returns `true` if a slot
/// was open. Any `pending_send` flush is the engine's responsibility —
/// this only tears down the socket and reader task.
pub async fn close_link(state: &Arc<Mutex<ModemState>>, link_id: usize) -> bool {
    let slot = {
        let mut guard = state.lock().await;
        guard.connections.get_mut(link_id).and_then(Option::take)
    };

    match slot {
        Some(slot) => {
            slot.shutdown().await;
            info!("link {link_id}: closed");
            true
        }
        None => false,
    }
}

/// Write a completed `AT+CIPSEND` payload to its socket. I/O errors are
/// logged and swallowed — `SEND OK` is still reported to the host (§7).
pub async fn send_to_link(state: &Arc<Mutex<ModemState>>, link_id: usize, data: &[u8]) {
    let mut guard = state.lock().await;
    if let Some(slot) = guard.connections.get_mut(link_id).and_then(Option::as_mut) {
        if let Err(e) = slot.writer.write_all(data).await {
            warn!("link {link_id}: send error: {e}");
        }
    } else {
        debug!(
            "link {link_id}: send to closed link, dropping {} bytes",
            data.len()
        );
    }
}

/// Pre-check "port available" procedure (§4.3): bind and close immediately,
/// to distinguish "port in use" from a real bind attempt made moments later
/// by `start_server` itself.
fn port_available(port: u16) -> bool {
    std::net::TcpListener::bind(("127.0.0.1", port)).is_ok()
}
