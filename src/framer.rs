//! Byte-stream framer: converts a raw host byte stream into either whole AT
//! command lines (*command mode*) or a fixed-size raw payload (*raw mode*),
//! and coordinates the transition between the two.
//!
//! The framer holds a single unconsumed-byte buffer regardless of mode —
//! only the *interpretation* of that buffer (line-split vs. fixed-count take)
//! changes with mode. This keeps raw-mode re-entry (leftover bytes after a
//! completed payload) a pure buffer operation instead of a cross-buffer copy.

/// One decoded unit the framer hands to the engine.
#[derive(Debug, PartialEq, Eq)]
pub enum FramerEvent {
    /// A complete, trimmed, non-empty command line.
    Line(String),
    /// A complete raw-mode payload, addressed to the link armed via `arm_raw`.
    Payload { link_id: usize, data: Vec<u8> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Command,
    Raw { link_id: usize, expected: usize },
}

/// The framing state machine. Pure and synchronous — it performs no I/O and
/// knows nothing about the engine; callers feed it bytes via `push` and drain
/// decoded events via `next_event` until it returns `None`.
pub struct Framer {
    mode: Mode,
    buf: Vec<u8>,
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

impl Framer {
    pub fn new() -> Self {
        Self {
            mode: Mode::Command,
            buf: Vec::new(),
        }
    }

    /// Append inbound host bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next fully-decoded event, if the buffer holds one. Call this
    /// in a loop after every `push` — a single push can yield several lines,
    /// or a line followed immediately by a raw payload that arrived in the
    /// same read.
    pub fn next_event(&mut self) -> Option<FramerEvent> {
        loop {
            match self.mode {
                Mode::Command => {
                    let newline_pos = self.buf.iter().position(|&b| b == b'\n')?;
                    let mut line_bytes: Vec<u8> = self.buf.drain(..=newline_pos).collect();
                    line_bytes.pop(); // trailing '\n'
                    if line_bytes.last() == Some(&b'\r') {
                        line_bytes.pop();
                    }
                    let line = String::from_utf8_lossy(&line_bytes).trim().to_string();
                    if line.is_empty() {
                        // Whitespace-only line: discard without response, keep looking.
                        continue;
                    }
                    return Some(FramerEvent::Line(line));
                }
                Mode::Raw { link_id, expected } => {
                    if self.buf.len() < expected {
                        return None;
                    }
                    let payload: Vec<u8> = self.buf.drain(..expected).collect();
                    self.mode = Mode::Command;
                    // Excess bytes are re-entering command mode. Filter to
                    // printable ASCII + CR/LF so binary trailers don't produce
                    // spurious "ERROR" lines (see design notes).
                    self.buf.retain(|&b| (0x20..=0x7e).contains(&b) || b == b'\n' || b == b'\r');
                    return Some(FramerEvent::Payload {
                        link_id,
                        data: payload,
                    });
                }
            }
        }
    }

    /// Transition to raw mode, arming it to collect exactly `expected` bytes
    /// for `link_id`. Called after the engine's response to a command names
    /// the `ArmRaw` side effect.
    pub fn arm_raw(&mut self, link_id: usize, expected: usize) {
        self.mode = Mode::Raw { link_id, expected };
    }

    #[cfg(test)]
    fn is_command_mode(&self) -> bool {
        matches!(self.mode, Mode::Command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_complete_lines_and_keeps_trailing_partial() {
        let mut framer = Framer::new();
        framer.push(b"AT\r\nAT+CWMODE");
        assert_eq!(
            framer.next_event(),
            Some(FramerEvent::Line("AT".to_string()))
        );
        assert_eq!(framer.next_event(), None);
        framer.push(b"?\r\n");
        assert_eq!(
            framer.next_event(),
            Some(FramerEvent::Line("AT+CWMODE?".to_string()))
        );
    }

    #[test]
    fn tolerates_bare_newline_terminator() {
        let mut framer = Framer::new();
        framer.push(b"AT\n");
        assert_eq!(
            framer.next_event(),
            Some(FramerEvent::Line("AT".to_string()))
        );
    }

    #[test]
    fn discards_whitespace_only_lines() {
        let mut framer = Framer::new();
        framer.push(b"   \r\nAT\r\n");
        assert_eq!(
            framer.next_event(),
            Some(FramerEvent::Line("AT".to_string()))
        );
        assert_eq!(framer.next_event(), None);
    }

    #[test]
    fn raw_mode_collects_exact_count_and_returns_to_command() {
        let mut framer = Framer::new();
        framer.arm_raw(0, 5);
        framer.push(b"hel");
        assert_eq!(framer.next_event(), None);
        framer.push(b"lo");
        assert_eq!(
            framer.next_event(),
            Some(FramerEvent::Payload {
                link_id: 0,
                data: b"hello".to_vec()
            })
        );
        assert!(framer.is_command_mode());
    }

    #[test]
    fn raw_mode_overflow_replays_through_command_mode_in_same_push() {
        let mut framer = Framer::new();
        framer.arm_raw(1, 3);
        framer.push(b"abcAT\r\n");
        assert_eq!(
            framer.next_event(),
            Some(FramerEvent::Payload {
                link_id: 1,
                data: b"abc".to_vec()
            })
        );
        assert_eq!(
            framer.next_event(),
            Some(FramerEvent::Line("AT".to_string()))
        );
    }

    #[test]
    fn raw_mode_overflow_filters_non_printable_bytes() {
        let mut framer = Framer::new();
        framer.arm_raw(0, 2);
        let mut input = b"hi".to_vec();
        input.extend_from_slice(&[0x00, 0x01]);
        input.extend_from_slice(b"AT\r\n");
        framer.push(&input);
        assert_eq!(
            framer.next_event(),
            Some(FramerEvent::Payload {
                link_id: 0,
                data: b"hi".to_vec()
            })
        );
        assert_eq!(
            framer.next_event(),
            Some(FramerEvent::Line("AT".to_string()))
        );
    }

    #[test]
    fn multiple_lines_in_one_push_are_all_emitted() {
        let mut framer = Framer::new();
        framer.push(b"AT\r\nAT+GMR\r\nAT+CWMODE?\r\n");
        assert_eq!(
            framer.next_event(),
            Some(FramerEvent::Line("AT".to_string()))
        );
        assert_eq!(
            framer.next_event(),
            Some(FramerEvent::Line("AT+GMR".to_string()))
        );
        assert_eq!(
            framer.next_event(),
            Some(FramerEvent::Line("AT+CWMODE?".to_string()))
        );
        assert_eq!(framer.next_event(), None);
    }
}
