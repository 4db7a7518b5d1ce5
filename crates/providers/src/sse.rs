//! Byte-level Server-Sent Events framing.
//!
//! Transport chunks may split anywhere: inside a line, inside a JSON string,
//! or inside a multi-byte UTF-8 sequence. Bytes are buffered until a full
//! line is available, so text is only decoded once a line is complete.

/// One dispatched SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// The `event:` field, if the server sent one
    pub event: Option<String>,
    /// All `data:` lines of the event, joined with `\n`
    pub data: String,
}

#[derive(Debug, Default)]
pub struct SseBuffer {
    pending: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns every event completed by them.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.pending.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut consumed = 0;
        while let Some(offset) = self.pending[consumed..].iter().position(|&b| b == b'\n') {
            let end = consumed + offset;
            let line = decode_line(&self.pending[consumed..end]);
            consumed = end + 1;
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }
        self.pending.drain(..consumed);
        events
    }

    /// End of stream: dispatch whatever is left, even without a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.pending.is_empty() {
            let line = decode_line(&self.pending);
            self.pending.clear();
            if let Some(event) = self.process_line(&line) {
                return Some(event);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        // Comment / keep-alive
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.data.is_empty() {
            self.event = None;
            return None;
        }
        let data = self.data.join("\n");
        self.data.clear();
        Some(SseEvent {
            event: self.event.take(),
            data,
        })
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_events_on_blank_lines() {
        let mut sse = SseBuffer::new();
        let events = sse.push(b"data: one\n\ndata: two\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "one");
        assert_eq!(events[1].data, "two");
    }

    #[test]
    fn event_field_and_comments() {
        let mut sse = SseBuffer::new();
        let events = sse.push(b": ping\nevent: message_stop\ndata: {\"type\":\"message_stop\"}\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("message_stop"));
        assert_eq!(events[0].data, r#"{"type":"message_stop"}"#);
    }

    #[test]
    fn multi_line_data_is_joined() {
        let mut sse = SseBuffer::new();
        let events = sse.push(b"data: first\ndata: second\n\n");
        assert_eq!(events[0].data, "first\nsecond");
    }

    #[test]
    fn chunk_boundary_inside_utf8_sequence() {
        let payload = "data: caf\u{e9} \u{1f600}\n\n".as_bytes();
        // Split inside the 4-byte emoji
        let split = payload.len() - 4;
        let mut sse = SseBuffer::new();
        assert!(sse.push(&payload[..split]).is_empty());
        let events = sse.push(&payload[split..]);
        assert_eq!(events[0].data, "caf\u{e9} \u{1f600}");
    }

    #[test]
    fn byte_at_a_time() {
        let payload = b"data: {\"a\":1}\n\n";
        let mut sse = SseBuffer::new();
        let mut events = Vec::new();
        for b in payload.iter() {
            events.extend(sse.push(std::slice::from_ref(b)));
        }
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, r#"{"a":1}"#);
    }

    #[test]
    fn finish_flushes_unterminated_event() {
        let mut sse = SseBuffer::new();
        assert!(sse.push(b"data: [DONE]").is_empty());
        let event = sse.finish().unwrap();
        assert_eq!(event.data, "[DONE]");
        assert!(sse.finish().is_none());
    }
}
