//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Live telemetry feed over server-sent events."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use bytes::{Buf, BytesMut};

/// Incremental `text/event-stream` decoder.
///
/// Only `data` fields are kept. Multi-line data is joined with `\n`, comments
/// and other fields are dropped. Chunks may split lines or UTF-8 sequences at
/// any byte.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: BytesMut,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return the data of every event it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line = self.buffer.split_to(newline);
            self.buffer.advance(1);
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = self.handle_line(line.trim_end_matches('\r')) {
                events.push(event);
            }
        }
        events
    }

    /// Drop any partially received event, e.g. after a disconnect.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.data.clear();
    }

    fn handle_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            if self.data.is_empty() {
                return None;
            }
            let event = self.data.join("\n");
            self.data.clear();
            return Some(event);
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_single_line_events() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: {\"a\":1}\n\ndata: {\"a\":2}\n\n");
        assert_eq!(events, vec!["{\"a\":1}", "{\"a\":2}"]);
    }

    #[test]
    fn joins_multi_line_data_and_ignores_other_fields() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b": keep-alive\nevent: sample\nid: 7\ndata: first\ndata:second\n\n");
        assert_eq!(events, vec!["first\nsecond"]);
    }

    #[test]
    fn handles_chunks_split_mid_line_and_crlf() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"da").is_empty());
        assert!(decoder.push(b"ta: hel").is_empty());
        assert!(decoder.push(b"lo\r\n").is_empty());
        assert_eq!(decoder.push(b"\r\n"), vec!["hello"]);
    }

    #[test]
    fn handles_utf8_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        let bytes = "data: 41.5°C\n\n".as_bytes();
        let split = bytes.iter().position(|byte| *byte == 0xC2).unwrap() + 1;
        assert!(decoder.push(&bytes[..split]).is_empty());
        assert_eq!(decoder.push(&bytes[split..]), vec!["41.5°C"]);
    }

    #[test]
    fn blank_lines_without_data_emit_nothing() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"\n\n: ping\n\n").is_empty());
        decoder.push(b"data: partial\n");
        decoder.reset();
        assert!(decoder.push(b"\n").is_empty());
    }
}
