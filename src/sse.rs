//! Incremental Server-Sent Events (SSE) record parser.
//!
//! Bytes are fed in whatever pieces the transport delivers them. Complete lines
//! are consumed immediately; an unterminated tail waits in the buffer for the
//! next chunk, so the decoded output does not depend on where chunks split.

use crate::types::Event;
use bytes::{Buf, BytesMut};
use tracing::{debug, trace};

/// Longest line kept while waiting for its terminator.
pub const DEFAULT_MAX_LINE_LEN: usize = 1024 * 1024;

/// SSE parser for an arbitrarily chunked event stream.
#[derive(Debug)]
pub struct RecordParser {
    /// Received bytes not yet resolved into complete lines.
    buffer: BytesMut,
    /// Leading bytes of `buffer` already searched for a line terminator.
    scanned: usize,
    /// The previous line ended in `\r`; a `\n` right after it belongs to it.
    skip_lf: bool,
    /// The current line outgrew `max_line_len`; drop it up to its terminator.
    overlong: bool,
    max_line_len: usize,
    /// Accumulated `data` lines of the record being assembled.
    pending_data: String,
    event_name: String,
    has_event_name: bool,
}

impl Default for RecordParser {
    fn default() -> Self {
        Self::with_max_line_len(DEFAULT_MAX_LINE_LEN)
    }
}

impl RecordParser {
    /// Create a new SSE parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a parser that discards any line longer than `max_line_len` bytes.
    pub fn with_max_line_len(max_line_len: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            scanned: 0,
            skip_lf: false,
            overlong: false,
            max_line_len,
            pending_data: String::new(),
            event_name: String::new(),
            has_event_name: false,
        }
    }

    /// Feed the next chunk and return the events it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Event> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut pos = 0;
        // Only meaningful for the line starting at 0, which earlier calls
        // have searched up to here.
        let mut scanned = std::mem::take(&mut self.scanned);

        while pos < self.buffer.len() {
            if self.skip_lf {
                self.skip_lf = false;
                if self.buffer[pos] == b'\n' {
                    pos += 1;
                }
                continue;
            }

            let from = pos.max(scanned);
            let Some(offset) = self.buffer[from..]
                .iter()
                .position(|&b| b == b'\r' || b == b'\n')
            else {
                // Unterminated tail, wait for more data
                scanned = self.buffer.len();
                break;
            };

            let end = from + offset;
            self.skip_lf = self.buffer[end] == b'\r';
            let start = pos;
            pos = end + 1;

            if std::mem::replace(&mut self.overlong, false) {
                continue;
            }

            let line = String::from_utf8_lossy(&self.buffer[start..end]).into_owned();
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }

        self.buffer.advance(pos);
        self.scanned = scanned.saturating_sub(pos);

        if self.buffer.len() > self.max_line_len {
            if !self.overlong {
                debug!(
                    max_line_len = self.max_line_len,
                    "dropping line over the length limit"
                );
            }
            self.overlong = true;
            self.buffer.clear();
            self.scanned = 0;
        }

        events
    }

    /// Feed a chunk of text.
    pub fn feed_str(&mut self, chunk: &str) -> Vec<Event> {
        self.feed(chunk.as_bytes())
    }

    /// Discard all buffered bytes and any partially assembled record.
    pub fn reset(&mut self) {
        *self = Self::with_max_line_len(self.max_line_len);
    }

    /// Number of buffered bytes that do not yet form a complete line.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether a record is partially assembled.
    pub fn has_pending_record(&self) -> bool {
        !self.pending_data.is_empty() || self.has_event_name
    }

    fn process_line(&mut self, line: &str) -> Option<Event> {
        if line.is_empty() {
            // Empty line = event dispatch
            return self.dispatch_record();
        }

        let (field, value) = match line.find(':') {
            Some(colon) => {
                let value = &line[colon + 1..];
                (&line[..colon], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };

        match field {
            "data" => {
                self.pending_data.push_str(value);
                self.pending_data.push('\n');
            }
            "event" => {
                self.event_name = value.to_string();
                self.has_event_name = true;
            }
            // id:, retry:, comments starting with : and anything unknown
            _ => trace!(field, "ignoring field"),
        }

        None
    }

    /// Complete the current record. Its state is cleared whatever the outcome.
    fn dispatch_record(&mut self) -> Option<Event> {
        let data = std::mem::take(&mut self.pending_data);
        let name = std::mem::take(&mut self.event_name);
        let named = std::mem::replace(&mut self.has_event_name, false);

        if data.is_empty() || !named {
            if !data.is_empty() {
                trace!("dropping record without an event name");
            }
            return None;
        }

        match serde_json::from_str(&data) {
            Ok(data) => Some(Event { name, data }),
            Err(err) => {
                debug!(event = %name, error = %err, "dropping record with malformed data");
                None
            }
        }
    }
}
