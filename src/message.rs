//! Splits IPC bytes into newline-delimited JSON messages, one child at a time.
//!
//! A compliant simpler implementation could treat each read as a batch of whole lines and drop a
//! trailing fragment; this one buffers the trailing fragment per child so a line split across two
//! non-blocking reads is still delivered whole, per §9 of the supervision spec.

use std::collections::HashMap;

use serde_json::Value;

/// Per-child trailing-byte buffers for IPC streams.
#[derive(Default)]
pub struct MessageParser {
    pending: HashMap<i32, Vec<u8>>,
}

impl MessageParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forget(&mut self, pid: i32) {
        self.pending.remove(&pid);
    }

    /// Feeds newly-read bytes for `pid`, invoking `on_message` once per complete, well-formed
    /// JSON line. Malformed lines are silently dropped; a trailing fragment with no newline is
    /// kept for the next call.
    pub fn feed(&mut self, pid: i32, bytes: &[u8], mut on_message: impl FnMut(Value)) {
        let buffer = self.pending.entry(pid).or_default();
        buffer.extend_from_slice(bytes);

        let mut start = 0;
        while let Some(relative_newline) = buffer[start..].iter().position(|&b| b == b'\n') {
            let end = start + relative_newline;
            let line = &buffer[start..end];
            if !line.is_empty() {
                if let Ok(value) = serde_json::from_slice::<Value>(line) {
                    on_message(value);
                }
            }
            start = end + 1;
        }
        buffer.drain(..start);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    mod feed {
        use super::*;

        #[test]
        fn single_line() {
            let mut parser = MessageParser::new();
            let mut seen = Vec::new();
            parser.feed(1, b"{\"a\":1}\n", |v| seen.push(v));
            assert_eq!(seen, vec![json!({"a": 1})]);
        }

        #[test]
        fn multiple_lines_one_read() {
            let mut parser = MessageParser::new();
            let mut seen = Vec::new();
            parser.feed(1, b"1\n2\n3\n", |v| seen.push(v));
            assert_eq!(seen, vec![json!(1), json!(2), json!(3)]);
        }

        #[test]
        fn malformed_line_dropped_without_halting_stream() {
            let mut parser = MessageParser::new();
            let mut seen = Vec::new();
            parser.feed(1, b"bad\n{\"ok\":1}\n", |v| seen.push(v));
            assert_eq!(seen, vec![json!({"ok": 1})]);
        }

        #[test]
        fn empty_line_skipped() {
            let mut parser = MessageParser::new();
            let mut seen = Vec::new();
            parser.feed(1, b"\n{\"ok\":1}\n", |v| seen.push(v));
            assert_eq!(seen, vec![json!({"ok": 1})]);
        }

        #[test]
        fn line_split_across_two_reads() {
            let mut parser = MessageParser::new();
            let mut seen = Vec::new();
            parser.feed(1, b"{\"a\":", |v| seen.push(v));
            assert!(seen.is_empty());
            parser.feed(1, b"1}\n", |v| seen.push(v));
            assert_eq!(seen, vec![json!({"a": 1})]);
        }

        #[test]
        fn pending_buffers_are_independent_per_child() {
            let mut parser = MessageParser::new();
            let mut seen = Vec::new();
            parser.feed(1, b"{\"a\":", |v| seen.push(v));
            parser.feed(2, b"{\"b\":2}\n", |v| seen.push(v));
            assert_eq!(seen, vec![json!({"b": 2})]);
            parser.feed(1, b"1}\n", |v| seen.push(v));
            assert_eq!(seen, vec![json!({"b": 2}), json!({"a": 1})]);
        }

        #[test]
        fn forget_drops_pending_fragment() {
            let mut parser = MessageParser::new();
            let mut seen = Vec::new();
            parser.feed(1, b"{\"a\":", |v| seen.push(v));
            parser.forget(1);
            parser.feed(1, b"1}\n", |v| seen.push(v));
            // Without the earlier fragment, `1}` alone is not valid JSON and is dropped.
            assert!(seen.is_empty());
        }
    }
}
