//! SSE (Server-Sent Events) decoding
//!
//! Incremental decoder for `text/event-stream` bodies. Used on the provider
//! side to read streamed completions, and by tests to read the relay's own
//! output back.

use serde::de::DeserializeOwned;

use crate::error::{ForestError, Result};

// ============================================================================
// SSE Decoder
// ============================================================================

/// SSE stream decoder with buffering
///
/// Bytes are buffered until a full line is available, so multi-byte UTF-8
/// sequences split across network chunks decode correctly. A frame is
/// dispatched on the blank line that ends it; `data:` lines within one frame
/// are joined with `\n`.
///
/// # Example
/// ```ignore
/// let mut decoder = SseDecoder::new();
///
/// while let Some(chunk) = stream.next().await {
///     for frame in decoder.push(&chunk?) {
///         if frame.is_done() { break; }
///         let data: MyType = frame.parse()?;
///     }
/// }
/// ```
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    data_len: usize,
}

impl SseDecoder {
    /// Maximum buffered bytes, both for a line without a newline and for
    /// the `data:` lines of a frame without its blank line (1MB)
    const MAX_BUFFER_SIZE: usize = 1024 * 1024;

    pub fn new() -> Self {
        Self::default()
    }

    /// Push a chunk of bytes and extract every frame it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line = line.strip_suffix('\r').unwrap_or(&line);

            if line.is_empty() {
                if let Some(frame) = self.dispatch() {
                    frames.push(frame);
                }
                continue;
            }

            self.field(line);
        }

        if self.buffer.len() > Self::MAX_BUFFER_SIZE {
            tracing::warn!(
                "SSE line exceeded {}KB without a newline, discarding",
                Self::MAX_BUFFER_SIZE / 1024
            );
            self.buffer.clear();
        }

        frames
    }

    /// Push a string directly (for testing or pre-decoded content)
    pub fn push_str(&mut self, s: &str) -> Vec<SseFrame> {
        self.push(s.as_bytes())
    }

    /// Flush a final frame that was not followed by a blank line
    pub fn finish(&mut self) -> Option<SseFrame> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest).into_owned();
            self.field(line.trim_end_matches('\r'));
        }
        self.dispatch()
    }

    /// Check if there's remaining buffered data
    pub fn has_remaining(&self) -> bool {
        !self.buffer.is_empty() || !self.data.is_empty()
    }

    fn field(&mut self, line: &str) {
        // Comment lines (keep-alives) carry no data
        if line.starts_with(':') {
            return;
        }

        let (name, value) = match line.split_once(':') {
            Some((name, value)) => (name, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match name {
            "data" => {
                self.data_len += value.len() + 1;
                if self.data_len > Self::MAX_BUFFER_SIZE {
                    tracing::warn!(
                        "SSE frame exceeded {}KB without a blank line, discarding",
                        Self::MAX_BUFFER_SIZE / 1024
                    );
                    self.data.clear();
                    self.data_len = 0;
                    self.event = None;
                    return;
                }
                self.data.push(value.to_string());
            }
            "event" => self.event = Some(value.to_string()),
            // id: and retry: are not used by either side
            _ => {}
        }
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        self.data_len = 0;
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame { event, data })
    }
}

// ============================================================================
// SSE Frame
// ============================================================================

/// A complete SSE frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// The `event:` name, if the frame carried one
    pub event: Option<String>,
    /// The joined `data:` content
    pub data: String,
}

impl SseFrame {
    /// Event name with the SSE default applied
    pub fn event_name(&self) -> &str {
        self.event.as_deref().unwrap_or("message")
    }

    /// Check if this is the `[DONE]` sentinel
    pub fn is_done(&self) -> bool {
        self.data == "[DONE]"
    }

    /// Parse the frame data as JSON
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.data).map_err(|e| {
            ForestError::Decode(format!("SSE JSON parse error: {}. Data: {}", e, self.preview()))
        })
    }

    /// Try to parse the frame data as JSON, returning None on failure
    pub fn try_parse<T: DeserializeOwned>(&self) -> Option<T> {
        serde_json::from_str(&self.data).ok()
    }

    /// Get a preview of the data (first 200 chars) for log lines
    pub fn preview(&self) -> String {
        match self.data.char_indices().nth(200) {
            Some((idx, _)) => format!("{}...", &self.data[..idx]),
            None => self.data.clone(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_basic_decode() {
        let mut decoder = SseDecoder::new();

        let frames = decoder.push_str("data: {\"text\": \"hello\"}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "{\"text\": \"hello\"}");
        assert_eq!(frames[0].event_name(), "message");
    }

    #[test]
    fn test_named_event() {
        let mut decoder = SseDecoder::new();

        let frames = decoder.push_str("event: message\ndata: {}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("message"));
    }

    #[test]
    fn test_done_frame() {
        let mut decoder = SseDecoder::new();

        let frames = decoder.push_str("data: [DONE]\n\n");
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_done());
    }

    #[test]
    fn test_partial_chunks() {
        let mut decoder = SseDecoder::new();

        let frames1 = decoder.push_str("data: {\"part\":");
        assert!(frames1.is_empty());
        assert!(decoder.has_remaining());

        let frames2 = decoder.push_str(" 1}\n\n");
        assert_eq!(frames2.len(), 1);
        assert_eq!(frames2[0].data, "{\"part\": 1}");
        assert!(!decoder.has_remaining());
    }

    #[test]
    fn test_split_utf8_sequence() {
        let mut decoder = SseDecoder::new();
        let bytes = "data: Wald \u{1F332}\n\n".as_bytes();
        let split = bytes.len() - 4;

        assert!(decoder.push(&bytes[..split]).is_empty());
        let frames = decoder.push(&bytes[split..]);
        assert_eq!(frames[0].data, "Wald \u{1F332}");
    }

    #[test]
    fn test_multiline_data_and_crlf() {
        let mut decoder = SseDecoder::new();

        let frames = decoder.push_str("data: first\r\ndata: second\r\n\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "first\nsecond");
    }

    #[test]
    fn test_comments_ignored() {
        let mut decoder = SseDecoder::new();

        let frames = decoder.push_str(":ping\n\n\n\ndata: content\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "content");
    }

    #[test]
    fn test_finish_flushes_unterminated_frame() {
        let mut decoder = SseDecoder::new();

        assert!(decoder.push_str("data: tail").is_empty());
        let frame = decoder.finish().unwrap();
        assert_eq!(frame.data, "tail");
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_oversized_frame_discarded() {
        let mut decoder = SseDecoder::new();
        let line = format!("data: {}\n", "x".repeat(1000));

        for _ in 0..2000 {
            assert!(decoder.push_str(&line).is_empty());
        }
        let held: usize = decoder.data.iter().map(|d| d.len()).sum();
        assert!(held <= SseDecoder::MAX_BUFFER_SIZE);

        // The decoder recovers for the next well-formed frame
        let mut decoder = SseDecoder::new();
        for _ in 0..1100 {
            decoder.push_str(&line);
        }
        let frames = decoder.push_str("\ndata: next\n\n");
        assert_eq!(frames.last().map(|f| f.data.as_str()), Some("next"));
    }

    #[test]
    fn test_parse_json() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct TestData {
            value: i32,
        }

        let mut decoder = SseDecoder::new();
        let frames = decoder.push_str("data: {\"value\": 42}\n\n");

        let parsed: TestData = frames[0].parse().unwrap();
        assert_eq!(parsed.value, 42);
    }

    #[test]
    fn test_try_parse_invalid() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push_str("data: not-json\n\n");

        let result: Option<serde_json::Value> = frames[0].try_parse();
        assert!(result.is_none());
        assert!(frames[0].parse::<serde_json::Value>().is_err());
    }
}
