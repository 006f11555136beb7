//! The modem's aggregate configuration and transient state, shared between
//! the command engine and the TCP bridge behind a single mutex (§5: all
//! mutations occur under mutual exclusion; there's one shared resource).

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::task::JoinHandle;

/// Number of multiplexed TCP links the modem exposes — fixed by the ESP8266
/// AT protocol's link-id range (`0..=3`), not a tunable knob.
pub const MAX_LINKS: usize = 4;

/// Fixed literal station IP reported by `AT+CIFSR` / `AT+CIPSTATUS`.
pub const STATION_IP: &str = "127.0.0.1";
/// Fixed literal MAC reported by `AT+CIFSR`.
pub const STATION_MAC: &str = "11:22:33:44:55:66";

/// One occupied slot in the connection table: the owning write half plus the
/// task servicing reads for that link.
pub struct ConnectionSlot {
    pub writer: OwnedWriteHalf,
    pub reader_task: JoinHandle<()>,
}

impl ConnectionSlot {
    /// Abort the read loop and close the write half. Used by `CloseLink`,
    /// `Reset`, and `StopServer` — never by the read loop itself (which exits
    /// on its own EOF/error and only clears the slot entry).
    pub async fn shutdown(mut self) {
        self.reader_task.abort();
        let _ = self.writer.shutdown().await;
    }
}

/// At most one in-flight `AT+CIPSEND` payload accumulation.
///
/// Created when `AT+CIPSEND` is accepted. `buffer` accumulates raw bytes from
/// the host until `received >= pkg_size`, at which point it is flushed to the
/// socket identified by `link_id` and the record is destroyed.
pub struct PendingSend {
    pub link_id: usize,
    pub pkg_size: usize,
    pub received: usize,
    pub buffer: Vec<u8>,
}

/// At most one buffered, not-yet-delivered inbound TCP chunk, consumed by
/// `AT+CIPRECVDATA`.
///
/// Per the source behavior (an acknowledged limitation, see design notes),
/// later inbound chunks arriving while one of these already exists are
/// dropped rather than queued.
pub struct PendingReceive {
    pub link_id: usize,
    pub size: usize,
    pub buffer: Vec<u8>,
}

/// The modem's single aggregate of configuration and transient state.
pub struct ModemState {
    pub wifi_connected: bool,
    /// `0..=3`; `2` means AP-only and rejects station-side commands.
    pub cw_mode: u8,
    /// `0` = single connection, `1` = multi-connection (link ids required).
    pub cip_mux: u8,
    /// Always `0` in this implementation — no transparent-transmission mode.
    pub cip_mode: u8,
    pub cip_server: u8,
    pub port: u16,
    pub ssid: String,
    pub password: String,
    pub connections: [Option<ConnectionSlot>; MAX_LINKS],
    pub pending_send: Option<PendingSend>,
    pub pending_receive: Option<PendingReceive>,
    /// Listener task for the currently running TCP server, if any.
    pub accept_task: Option<JoinHandle<()>>,
    /// Count of inbound TCP chunks dropped because `pending_receive` was
    /// already occupied. Exposed only via logs — a future revision could
    /// queue these instead of dropping them (see design notes).
    pub dropped_receive_chunks: u64,
}

impl Default for ModemState {
    fn default() -> Self {
        Self::new()
    }
}

impl ModemState {
    pub fn new() -> Self {
        Self {
            wifi_connected: false,
            cw_mode: 1,
            cip_mux: 0,
            cip_mode: 0,
            cip_server: 0,
            port: 0,
            ssid: String::new(),
            password: String::new(),
            connections: [None, None, None, None],
            pending_send: None,
            pending_receive: None,
            accept_task: None,
            dropped_receive_chunks: 0,
        }
    }

    /// Reset to a fresh state (`AT+RST`). Does not touch `dropped_receive_chunks`
    /// — that counter is diagnostic, not protocol state.
    ///
    /// Returns the connection slots and the accept task so the caller can shut
    /// them down outside the lock (socket/task teardown should not happen
    /// while holding the state mutex).
    pub fn reset(&mut self) -> ([Option<ConnectionSlot>; MAX_LINKS], Option<JoinHandle<()>>) {
        self.wifi_connected = false;
        self.cw_mode = 1;
        self.cip_server = 0;
        self.port = 0;
        self.cip_mux = 0;
        self.cip_mode = 0;
        self.ssid.clear();
        self.password.clear();
        self.pending_send = None;
        self.pending_receive = None;

        self.take_connections()
    }

    /// Hand back ownership of every connection slot and the accept task,
    /// leaving the table empty. Used by `AT+RST` (via `reset`) and by
    /// `StopServer`, which tears down the table without touching the rest
    /// of the modem's configuration.
    pub fn take_connections(&mut self) -> ([Option<ConnectionSlot>; MAX_LINKS], Option<JoinHandle<()>>) {
        let slots = std::mem::replace(&mut self.connections, [None, None, None, None]);
        let accept_task = self.accept_task.take();
        (slots, accept_task)
    }

    /// Lowest-indexed empty slot, if any.
    pub fn free_slot(&self) -> Option<usize> {
        self.connections.iter().position(Option::is_none)
    }

    pub fn slot_open(&self, link_id: usize) -> bool {
        self.connections
            .get(link_id)
            .is_some_and(Option::is_some)
    }

    pub fn any_connection_open(&self) -> bool {
        self.connections.iter().any(Option::is_some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_matches_esp8266_defaults() {
        let state = ModemState::new();
        assert_eq!(state.cw_mode, 1);
        assert_eq!(state.cip_mux, 0);
        assert!(!state.wifi_connected);
        assert!(state.free_slot().is_some());
    }

    #[test]
    fn reset_restores_defaults_but_not_diagnostics() {
        let mut state = ModemState::new();
        state.cw_mode = 0;
        state.cip_mux = 1;
        state.wifi_connected = true;
        state.ssid = "home".into();
        state.dropped_receive_chunks = 3;

        let (slots, accept_task) = state.reset();

        assert_eq!(state.cw_mode, 1);
        assert_eq!(state.cip_mux, 0);
        assert!(!state.wifi_connected);
        assert!(state.ssid.is_empty());
        assert_eq!(state.dropped_receive_chunks, 3);
        assert!(slots.iter().all(Option::is_none));
        assert!(accept_task.is_none());
    }

    #[test]
    fn free_slot_is_lowest_indexed() {
        let mut state = ModemState::new();
        assert_eq!(state.free_slot(), Some(0));
        // Occupy slot 0 manually isn't possible without a real socket in this
        // test, so just verify the table starts fully free.
        assert_eq!(state.connections.len(), MAX_LINKS);
    }
}
