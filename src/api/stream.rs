use super::logging::{debug_frames_enabled, emit_frame_debug, emit_payload_fallback};
use crate::types::{EventKind, Payload, StreamEvent};
use chrono::{DateTime, Utc};

/// Splits server-push bytes into blank-line terminated frames.
///
/// Bytes are buffered undecoded until a frame terminator arrives, so a
/// multi-byte character split across two chunks decodes intact.
pub struct StreamParser {
    buffer: Vec<u8>,
    /// Raw frame logging, read from the environment once per stream.
    debug_frames: bool,
}

impl Default for StreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamParser {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            debug_frames: debug_frames_enabled(),
        }
    }

    pub fn process(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.process_at(chunk, Utc::now())
    }

    /// Same as [`process`](Self::process) with an explicit arrival time.
    pub fn process_at(&mut self, chunk: &[u8], received_at: DateTime<Utc>) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        let mut start = 0;

        while let Some((end, delimiter_len)) = find_frame_end(&self.buffer[start..]) {
            let frame_text = String::from_utf8_lossy(&self.buffer[start..start + end]);
            if self.debug_frames {
                emit_frame_debug(&frame_text);
            }
            if let Some(event) = parse_frame(&frame_text, received_at) {
                events.push(event);
            }
            start += end + delimiter_len;
        }

        if start > 0 {
            self.buffer.drain(..start);
        }

        events
    }

    /// Unconsumed bytes of a frame that never got its terminator.
    pub fn remainder(&self) -> String {
        String::from_utf8_lossy(&self.buffer).into_owned()
    }

    pub fn flush(&mut self) -> String {
        let rest = self.remainder();
        self.buffer.clear();
        rest
    }
}

fn find_frame_end(buf: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i + 1 < buf.len() {
        if buf[i] == b'\n' && buf[i + 1] == b'\n' {
            return Some((i, 2));
        }
        if i + 3 < buf.len() && &buf[i..i + 4] == b"\r\n\r\n" {
            return Some((i, 4));
        }
        i += 1;
    }
    None
}

/// Parses one complete frame. Frames with neither an event name nor data are skipped.
pub fn parse_frame(text: &str, received_at: DateTime<Utc>) -> Option<StreamEvent> {
    let mut event_type: Option<String> = None;
    let mut id: Option<String> = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for raw_line in text.split('\n') {
        let line = raw_line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("event:") {
            event_type = Some(field_value(rest).to_string());
        } else if let Some(rest) = line.strip_prefix("id:") {
            id = Some(field_value(rest).to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(field_value(rest));
        }
    }

    if event_type.is_none() && data_lines.is_empty() {
        return None;
    }

    let kind = event_type
        .as_deref()
        .map(EventKind::parse)
        .unwrap_or(EventKind::Message);
    let data = data_lines.join("\n");
    let payload = match Payload::decode(&data) {
        Ok(payload) => payload,
        Err((raw, error)) => {
            emit_payload_fallback(kind.as_str(), &raw, &error);
            Payload::Raw(raw)
        }
    };

    Some(StreamEvent {
        kind,
        id: id.filter(|value| !value.is_empty()),
        payload,
        received_at,
    })
}

fn field_value(rest: &str) -> &str {
    rest.strip_prefix(' ').unwrap_or(rest)
}
