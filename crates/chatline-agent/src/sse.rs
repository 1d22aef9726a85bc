//! Incremental decoder for `text/event-stream` bodies.
//!
//! Network chunks arrive at arbitrary byte boundaries: a multi-byte UTF-8
//! sequence, a `\r\n` pair or an event may be split across two chunks.
//! [`SseDecoder`] buffers whatever is incomplete and yields the `data` payload
//! of each finished event.

/// Stateful SSE decoder.  Feed it chunks with [`SseDecoder::push`].
#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Undecoded bytes (an incomplete UTF-8 sequence at most).
    bytes: Vec<u8>,
    /// Decoded text not yet terminated by `\n`.
    line: String,
    /// `data:` lines of the event currently being assembled.
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network chunk and return the payloads of all events it
    /// completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.bytes.extend_from_slice(chunk);
        self.decode_utf8();

        let mut events = Vec::new();
        while let Some(pos) = self.line.find('\n') {
            let mut line: String = self.line.drain(..=pos).collect();
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
            if let Some(event) = self.take_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush an event left open by a body that ended without the closing
    /// blank line.
    pub fn finish(&mut self) -> Option<String> {
        if !self.line.is_empty() {
            let line = std::mem::take(&mut self.line);
            let line = line.strip_suffix('\r').unwrap_or(line.as_str()).to_owned();
            self.take_line(&line);
        }
        self.dispatch()
    }

    fn decode_utf8(&mut self) {
        let mut start = 0;
        while start < self.bytes.len() {
            match std::str::from_utf8(&self.bytes[start..]) {
                Ok(s) => {
                    self.line.push_str(s);
                    start = self.bytes.len();
                }
                Err(e) => {
                    let valid = start + e.valid_up_to();
                    if let Ok(s) = std::str::from_utf8(&self.bytes[start..valid]) {
                        self.line.push_str(s);
                    }
                    match e.error_len() {
                        // Incomplete sequence at the end: wait for more bytes.
                        None => {
                            start = valid;
                            break;
                        }
                        Some(n) => {
                            self.line.push(char::REPLACEMENT_CHARACTER);
                            start = valid + n;
                        }
                    }
                }
            }
        }
        self.bytes.drain(..start);
    }

    fn take_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            self.data.push(value.to_owned());
        }
        None
    }

    fn dispatch(&mut self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        let payload = self.data.join("\n");
        self.data.clear();
        Some(payload)
    }
}
