//! AT command dispatcher: the stateful heart of the modem. Parses one
//! trimmed command line at a time, validates it against `ModemState`,
//! mutates state, and returns the response text plus a side effect for the
//! caller (the modem actor) to act on.
//!
//! Commands that need the TCP bridge (`CIPSERVER`, `CIPCLOSE`) call into
//! `bridge` directly and await its outcome before responding — this is
//! what §5 means by "the engine blocks on the server-start outcome before
//! responding". The engine never holds the state lock across one of those
//! calls, since `bridge` takes the same lock internally.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::bridge;
use crate::config::Config;
use crate::state::{ModemState, PendingReceive, PendingSend, STATION_IP, STATION_MAC};

const ERROR: &str = "\r\n\r\nERROR\r\n";
const OK: &str = "\r\n\r\nOK\r\n";

const GMR_BANNER: &str = "\r\nAT version:0.51.0.0(Nov 27 2015 13:37:21)\r\nSDK version:1.5.0\r\ncompile time:Nov 27 2015 13:58:02\r\n\r\nOK\r\n";

const CWLAP_LIST: &str = "\r\n+CWLAP:(4,\"rede1\",-91,\"30:b5:c2:2b:58:de\",1)\r\n+CWLAP:(0,\"netmail12\",-88,\"00:0c:42:18:c6:4c\",2)\r\n+CWLAP:(0,\"netmail10\",-91,\"00:0c:42:1f:1d:81\",7)\r\n+CWLAP:(0,\"netmail11\",-84,\"00:0c:42:1f:73:2e\",9)\r\n\r\nOK\r\n";

const CIPSTA_BLOCK: &str = "\r\n+CIPSTA:ip:192.168.0.2\r\n+CIPSTA:gateway:192.168.0.1\r\n+CIPSTA:netmask:255.255.255.0\r\n\r\nOK\r\n";

/// The ESP8266 boot-ROM dump emitted ~500ms after `AT+RST` answers `OK`.
pub const BOOT_BANNER: &str = "WIFI DISCONNECT\r\n\r\n ets Jan  8 2013,rst cause:1, boot mode:(3,7)\r\n\r\nload 0x40100000, len 1396, room 16\r\ntail 4\r\nchksum 0x89\r\nload 0x3ffe8000, len 776, room 4\r\ntail 4\r\nchksum 0xe8\r\nload 0x3ffe8308, len 540, room 4\r\ntail 8\r\nchksum 0xc0\r\ncsum 0xc0\r\n\r\n2nd boot version : 1.4(b1)\r\n  SPI Speed      : 40MHz\r\n  SPI Mode       : QIO\r\n  SPI Flash Size & Map: 8Mbit(512KB+512KB)\r\njump to run user1 @ 1000\r\n\r\nready\r\n";

/// Side effect the caller (the modem actor) must carry out after a response
/// is fully emitted.
#[derive(Debug, PartialEq, Eq)]
pub enum SideEffect {
    None,
    ArmRaw { link_id: usize, size: usize },
    Reset,
}

pub struct Engine {
    state: Arc<Mutex<ModemState>>,
    outbound: tokio::sync::mpsc::Sender<Vec<u8>>,
    config: Arc<Config>,
}

impl Engine {
    pub fn new(
        state: Arc<Mutex<ModemState>>,
        outbound: tokio::sync::mpsc::Sender<Vec<u8>>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            state,
            outbound,
            config,
        }
    }

    /// Dispatch one trimmed, non-empty command line.
    pub async fn dispatch(&self, line: &str) -> (String, SideEffect) {
        debug!("dispatch: {line}");

        if line == "AT" {
            return (OK.to_string(), SideEffect::None);
        }

        if line == "AT+RST" {
            let (slots, accept_task) = {
                let mut st = self.state.lock().await;
                st.reset()
            };
            if let Some(task) = accept_task {
                task.abort();
            }
            for slot in slots.into_iter().flatten() {
                slot.shutdown().await;
            }
            return (OK.to_string(), SideEffect::Reset);
        }

        if line == "AT+GMR" {
            return (GMR_BANNER.to_string(), SideEffect::None);
        }

        if let Some(rest) = line.strip_prefix("AT+CWMODE=") {
            if let Some(mode) = rest.trim().parse::<u8>().ok().filter(|&m| m <= 3) {
                let mut st = self.state.lock().await;
                st.cw_mode = mode;
                return (OK.to_string(), SideEffect::None);
            }
            return (ERROR.to_string(), SideEffect::None);
        }

        if line == "AT+CWMODE?" {
            let mode = self.state.lock().await.cw_mode;
            return (format!("\r\n+CWMODE:{mode}\r\n\r\nOK\r\n"), SideEffect::None);
        }

        if line.starts_with("AT+CWDHCP=") {
            return (OK.to_string(), SideEffect::None);
        }

        if line == "AT+CWLAP" {
            let cw_mode = self.state.lock().await.cw_mode;
            if cw_mode != 2 {
                return (CWLAP_LIST.to_string(), SideEffect::None);
            }
            debug!("CWLAP rejected: cw_mode == 2");
            return (ERROR.to_string(), SideEffect::None);
        }

        if line == "AT+CIPSTA?" {
            let cw_mode = self.state.lock().await.cw_mode;
            if cw_mode != 2 {
                return (CIPSTA_BLOCK.to_string(), SideEffect::None);
            }
            debug!("CIPSTA? rejected: cw_mode == 2");
            return (ERROR.to_string(), SideEffect::None);
        }

        if let Some(rest) = line.strip_prefix("AT+CWJAP=") {
            let cw_mode = self.state.lock().await.cw_mode;
            if cw_mode != 2 {
                if let Some((ssid, password)) = parse_cwjap(rest) {
                    let mut st = self.state.lock().await;
                    st.ssid = ssid;
                    st.password = password;
                    st.wifi_connected = true;
                    return (
                        "\r\n\r\nWIFI CONNECTED\r\nWIFI GOT IP\r\n\r\nOK\r\n".to_string(),
                        SideEffect::None,
                    );
                }
                debug!("CWJAP: no quoted ssid/password pair in {rest:?}");
            } else {
                debug!("CWJAP rejected: cw_mode == 2");
            }
            return (ERROR.to_string(), SideEffect::None);
        }

        if line == "AT+CIFSR" {
            let connected = self.state.lock().await.wifi_connected;
            if connected {
                return (
                    format!("\r\n+CIFSR:STAIP,\"{STATION_IP}\"\r\n+CIFSR:STAMAC,\"{STATION_MAC}\"\r\n\r\nOK\r\n"),
                    SideEffect::None,
                );
            }
            return (ERROR.to_string(), SideEffect::None);
        }

        if let Some(rest) = line.strip_prefix("AT+CIPMUX=") {
            if let Ok(n) = rest.trim().parse::<u8>() {
                let mut st = self.state.lock().await;
                if st.cip_server == 0 && st.cip_mode == 0 {
                    st.cip_mux = n;
                    return (OK.to_string(), SideEffect::None);
                }
            }
            return (ERROR.to_string(), SideEffect::None);
        }

        if line == "AT+CIPMUX?" {
            let n = self.state.lock().await.cip_mux;
            return (format!("\r\n+CIPMUX:{n}\r\n\r\nOK\r\n"), SideEffect::None);
        }

        if let Some(rest) = line.strip_prefix("AT+CIPSERVER=") {
            return (self.handle_cipserver(rest).await, SideEffect::None);
        }

        if line == "AT+CIPSTATUS" {
            return (self.handle_cipstatus().await, SideEffect::None);
        }

        if line == "ATE0" || line == "ATE1" {
            return ("OK\r\n".to_string(), SideEffect::None);
        }

        if line.starts_with("AT+CIPRECVMODE=1") {
            return ("OK\r\n".to_string(), SideEffect::None);
        }

        if line.starts_with("AT+CIPRECVLEN?") {
            let len = self
                .state
                .lock()
                .await
                .pending_receive
                .as_ref()
                .map(|p| p.size)
                .unwrap_or(0);
            return (
                format!("\r\n+CIPRECVLEN:{len},0,0,0,0\r\n\r\nOK\r\n"),
                SideEffect::None,
            );
        }

        if let Some(rest) = line.strip_prefix("AT+CIPRECVDATA=") {
            return (self.handle_ciprecvdata(rest).await, SideEffect::None);
        }

        if line.starts_with("AT+CIPSERVERMAXCONN=") {
            return ("OK\r\n".to_string(), SideEffect::None);
        }

        if line.starts_with("AT+CIPSTO=") {
            return ("OK\r\n".to_string(), SideEffect::None);
        }

        if let Some(rest) = line.strip_prefix("AT+CIPSEND=") {
            return self.handle_cipsend(rest).await;
        }

        if let Some(rest) = line.strip_prefix("AT+CIPCLOSE=") {
            return (self.handle_cipclose(rest).await, SideEffect::None);
        }

        (ERROR.to_string(), SideEffect::None)
    }

    /// Completed raw-mode payload arrived for `link_id`. Flushes the
    /// accumulated `pending_send` buffer (which may carry bytes left over
    /// from a prior, never-completed `AT+CIPSEND` — see design notes) to
    /// the socket and reports completion.
    pub async fn handle_send_payload(&self, link_id: usize, data: Vec<u8>) -> String {
        let (buffer, pkg_size) = {
            let mut st = self.state.lock().await;
            match st.pending_send.take() {
                Some(mut pending) => {
                    pending.buffer.extend_from_slice(&data);
                    pending.received += data.len();
                    (pending.buffer, pending.pkg_size)
                }
                None => {
                    debug!("link {link_id}: raw payload with no pending_send, sending as-is");
                    let len = data.len();
                    (data, len)
                }
            }
        };
        bridge::send_to_link(&self.state, link_id, &buffer).await;
        format!("\r\nRecv {pkg_size} bytes\r\n\r\nSEND OK\r\n")
    }

    async fn handle_cipserver(&self, params: &str) -> String {
        let parts: Vec<&str> = params.split(',').map(str::trim).collect();
        let Some(flag) = parts.first().and_then(|s| s.parse::<u8>().ok()) else {
            return ERROR.to_string();
        };

        if flag == 1 {
            let Some(port) = parts.get(1).and_then(|s| s.parse::<u16>().ok()) else {
                return ERROR.to_string();
            };
            {
                let mut st = self.state.lock().await;
                st.port = port;
            }
            let ok = bridge::start_server(
                &self.state,
                self.outbound.clone(),
                port,
                &self.config.server,
            )
            .await;
            let mut st = self.state.lock().await;
            st.cip_server = if ok { 1 } else { 0 };
            if ok {
                "OK\r\n".to_string()
            } else {
                "ERROR\r\n".to_string()
            }
        } else {
            bridge::stop_server(&self.state).await;
            "OK\r\n".to_string()
        }
    }

    async fn handle_cipstatus(&self) -> String {
        let st = self.state.lock().await;
        let mut body = String::new();
        if st.any_connection_open() {
            body.push_str("\r\nSTATUS:3\r\n");
            for (i, slot) in st.connections.iter().enumerate() {
                if slot.is_some() {
                    body.push_str(&format!(
                        "+CIPSTATUS:{i},\"TCP\",\"192.168.0.31\",53116,2000,1\r\n"
                    ));
                }
            }
        } else {
            body.push_str("\r\nSTATUS:2\r\n");
        }
        body.push_str("\r\nOK\r\n");
        body
    }

    async fn handle_ciprecvdata(&self, params: &str) -> String {
        let parts: Vec<&str> = params.split(',').map(str::trim).collect();
        let link_id = parts.first().and_then(|s| s.parse::<usize>().ok());
        let requested = parts.get(1).and_then(|s| s.parse::<usize>().ok());
        // link_id must parse but, per the source, is never cross-checked
        // against pending_receive.link_id.
        let (Some(_link_id), Some(n)) = (link_id, requested) else {
            return ERROR.to_string();
        };

        let mut st = self.state.lock().await;
        match st.pending_receive.take() {
            Some(pending) => {
                let k = n.min(pending.buffer.len());
                let (taken, remaining) = pending.buffer.split_at(k);
                let payload = String::from_utf8_lossy(taken).to_string();
                let remaining = remaining.to_vec();
                let response = format!("\r\n\r\n+CIPRECVDATA,{k}:{payload}\r\n\r\nOK\r\n");
                if !remaining.is_empty() {
                    st.pending_receive = Some(PendingReceive {
                        link_id: pending.link_id,
                        size: remaining.len(),
                        buffer: remaining,
                    });
                }
                response
            }
            None => "+CIPRECVDATA:0,192.168.0.2,8080,\r\nOK\r\n".to_string(),
        }
    }

    async fn handle_cipsend(&self, params: &str) -> (String, SideEffect) {
        let parts: Vec<&str> = params.split(',').map(str::trim).collect();
        let cip_mux = self.state.lock().await.cip_mux;
        let parsed = if cip_mux == 1 {
            match (
                parts.first().and_then(|s| s.parse::<usize>().ok()),
                parts.get(1).and_then(|s| s.parse::<usize>().ok()),
            ) {
                (Some(l), Some(s)) => Some((l, s)),
                _ => None,
            }
        } else {
            parts
                .first()
                .and_then(|s| s.parse::<usize>().ok())
                .map(|s| (0, s))
        };

        let Some((link_id, requested_size)) = parsed else {
            return (ERROR.to_string(), SideEffect::None);
        };

        let size = requested_size.min(self.config.server.cip_send_max);
        if size < requested_size {
            debug!("CIPSEND: truncated {requested_size} to {size}");
        }

        let mut st = self.state.lock().await;
        if !st.slot_open(link_id) {
            return (ERROR.to_string(), SideEffect::None);
        }

        // The prior pending_send's link_id and buffer are preserved
        // untouched when one already exists — only size/received reset.
        // See design notes: preserved intentionally, not corrected.
        match &mut st.pending_send {
            Some(pending) => {
                pending.pkg_size = size;
                pending.received = 0;
            }
            None => {
                st.pending_send = Some(PendingSend {
                    link_id,
                    pkg_size: size,
                    received: 0,
                    buffer: Vec::new(),
                });
            }
        }

        (
            "\r\n\r\nOK\r\n> ".to_string(),
            SideEffect::ArmRaw { link_id, size },
        )
    }

    async fn handle_cipclose(&self, params: &str) -> String {
        let Ok(link_id) = params.trim().parse::<usize>() else {
            return ERROR.to_string();
        };

        let pending = {
            let mut st = self.state.lock().await;
            if !st.slot_open(link_id) {
                return ERROR.to_string();
            }
            // Any pending_send — regardless of which link it targets — is
            // flushed to the link being closed. Preserved from the source.
            st.pending_send.take()
        };

        if let Some(pending) = pending {
            bridge::send_to_link(&self.state, link_id, &pending.buffer).await;
        }
        bridge::close_link(&self.state, link_id).await;

        format!("\r\n{link_id},CLOSED\r\n\r\nOK\r\n")
    }
}

/// Extract a `"ssid","password"` pair, tolerating ASCII `"` and the two
/// Unicode smart-quote variants as delimiters (the source accepts both).
fn parse_cwjap(params: &str) -> Option<(String, String)> {
    fn is_quote(c: char) -> bool {
        matches!(c, '"' | '\u{201c}' | '\u{201d}')
    }

    let chars: Vec<char> = params.chars().collect();
    let mut idx = 0;

    idx = chars[idx..].iter().position(|&c| is_quote(c))? + idx;
    idx += 1;
    let start1 = idx;
    idx = chars[idx..].iter().position(|&c| is_quote(c))? + idx;
    let ssid: String = chars[start1..idx].iter().collect();
    idx += 1;

    idx = chars[idx..].iter().position(|&c| c == ',')? + idx;
    idx += 1;

    idx = chars[idx..].iter().position(|&c| is_quote(c))? + idx;
    idx += 1;
    let start2 = idx;
    idx = chars[idx..].iter().position(|&c| is_quote(c))? + idx;
    let password: String = chars[start2..idx].iter().collect();

    if ssid.is_empty() || password.is_empty() {
        return None;
    }
    Some((ssid, password))
}
