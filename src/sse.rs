//! Incremental decoder for SSE-framed text streams.
//!
//! The backend frames each event as a group of `field: value` lines ended by
//! a blank line. Chunks arrive with arbitrary boundaries (mid-line, mid-frame,
//! even mid-character), so the decoder buffers until a full frame is present
//! and hands back only complete frames.

/// Event name used when a frame carries no `event:` line.
pub const DEFAULT_EVENT: &str = "message";

const FRAME_DELIMITER: &str = "\n\n";

/// One decoded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame {
    pub event: String,
    pub data: String,
}

impl StreamFrame {
    /// Parse the text of a single frame (without its trailing blank line).
    ///
    /// Never fails: a frame without `data:` lines has empty data, unknown
    /// fields are ignored.
    pub fn parse(raw: &str) -> Self {
        let mut event = None;
        let mut data_lines: Vec<&str> = Vec::new();

        for line in raw.split('\n') {
            if let Some(value) = line.strip_prefix("event:") {
                event = Some(value.trim());
            } else if let Some(value) = line.strip_prefix("data:") {
                let value = value.strip_prefix(' ').unwrap_or(value);
                data_lines.push(value.trim_end());
            }
        }

        Self {
            event: event.unwrap_or(DEFAULT_EVENT).to_string(),
            data: data_lines.join("\n"),
        }
    }
}

/// Buffers stream input and yields complete frames.
///
/// Holds at most one partial frame, plus up to three bytes of an unfinished
/// UTF-8 sequence when fed raw bytes.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buffer: String,
    pending_bytes: Vec<u8>,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append text and return every frame completed by it, in arrival order.
    pub fn feed(&mut self, chunk: &str) -> Vec<StreamFrame> {
        self.buffer.push_str(chunk);
        self.drain_frames()
    }

    /// Append raw bytes, decoding UTF-8 incrementally.
    ///
    /// A character split across chunks is held back until it is complete.
    /// Invalid sequences decode to U+FFFD.
    pub fn feed_bytes(&mut self, chunk: &[u8]) -> Vec<StreamFrame> {
        let mut input = std::mem::take(&mut self.pending_bytes);
        input.extend_from_slice(chunk);

        loop {
            let err = match std::str::from_utf8(&input) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    break;
                }
                Err(err) => err,
            };

            let valid = err.valid_up_to();
            self.buffer
                .push_str(&String::from_utf8_lossy(&input[..valid]));
            match err.error_len() {
                Some(bad) => {
                    self.buffer.push(char::REPLACEMENT_CHARACTER);
                    input.drain(..valid + bad);
                }
                None => {
                    // Incomplete sequence at the end: keep it for the next chunk.
                    self.pending_bytes = input.split_off(valid);
                    break;
                }
            }
        }

        self.drain_frames()
    }

    /// Text received but not yet part of a complete frame.
    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    /// End of stream. An undelimited remainder is dropped, not guessed at.
    pub fn finish(self) {
        if !self.buffer.trim().is_empty() || !self.pending_bytes.is_empty() {
            tracing::debug!(
                buffered = self.buffer.len(),
                pending_bytes = self.pending_bytes.len(),
                "Dropping partial frame at end of stream"
            );
        }
    }

    fn drain_frames(&mut self) -> Vec<StreamFrame> {
        let mut frames = Vec::new();
        let mut consumed = 0;

        while let Some(offset) = self.buffer[consumed..].find(FRAME_DELIMITER) {
            let end = consumed + offset;
            frames.push(StreamFrame::parse(&self.buffer[consumed..end]));
            consumed = end + FRAME_DELIMITER.len();
        }

        if consumed > 0 {
            self.buffer.drain(..consumed);
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(event: &str, data: &str) -> StreamFrame {
        StreamFrame {
            event: event.to_string(),
            data: data.to_string(),
        }
    }

    #[test]
    fn single_complete_frame() {
        let mut decoder = StreamDecoder::new();
        let frames = decoder.feed("event: meta\ndata: {\"session_id\":7}\n\n");
        assert_eq!(frames, vec![frame("meta", "{\"session_id\":7}")]);
        assert_eq!(decoder.buffered(), "");
    }

    #[test]
    fn chunk_boundaries_do_not_change_output() {
        let input = "event: meta\ndata: {\"session_id\":7}\n\ndata: hello\n\nevent: done\ndata:\n\n";
        let mut whole = StreamDecoder::new();
        let expected = whole.feed(input);
        assert_eq!(expected.len(), 3);

        for split in 1..input.len() {
            let mut decoder = StreamDecoder::new();
            let mut frames = decoder.feed(&input[..split]);
            frames.extend(decoder.feed(&input[split..]));
            assert_eq!(frames, expected, "split at {}", split);
        }
    }

    #[test]
    fn partial_frame_stays_buffered() {
        let mut decoder = StreamDecoder::new();
        assert!(decoder.feed("event: meta\ndata: {\"sess").is_empty());
        assert_eq!(decoder.buffered(), "event: meta\ndata: {\"sess");
        let frames = decoder.feed("ion_id\":7}\n\n");
        assert_eq!(frames, vec![frame("meta", "{\"session_id\":7}")]);
    }

    #[test]
    fn multiple_data_lines_join_with_newline() {
        let mut decoder = StreamDecoder::new();
        let frames = decoder.feed("data: foo\ndata: bar\n\n");
        assert_eq!(frames, vec![frame("message", "foo\nbar")]);
    }

    #[test]
    fn trailing_whitespace_trimmed_leading_kept() {
        let frame = StreamFrame::parse("data:   indented  \r");
        assert_eq!(frame.data, "  indented");
    }

    #[test]
    fn frame_without_data_has_empty_data() {
        let frame = StreamFrame::parse("event: done");
        assert_eq!(frame.event, "done");
        assert_eq!(frame.data, "");
    }

    #[test]
    fn comments_and_unknown_fields_ignored() {
        let frame = StreamFrame::parse(": keepalive\nid: 4\nretry: 100\ndata: x");
        assert_eq!(frame, StreamFrame::parse("data: x"));
        assert_eq!(frame.event, DEFAULT_EVENT);
    }

    #[test]
    fn last_event_line_wins() {
        let frame = StreamFrame::parse("event: first\nevent: second\ndata: x");
        assert_eq!(frame.event, "second");
    }

    #[test]
    fn multibyte_character_split_across_byte_chunks() {
        let input = "data: caf\u{e9} \u{1f600}\n\n".as_bytes();
        let accent = input.iter().position(|b| *b == 0xC3).expect("accent byte");
        let emoji = input.iter().position(|b| *b == 0xF0).expect("emoji byte");

        let mut decoder = StreamDecoder::new();
        let mut frames = decoder.feed_bytes(&input[..accent + 1]);
        frames.extend(decoder.feed_bytes(&input[accent + 1..emoji + 2]));
        frames.extend(decoder.feed_bytes(&input[emoji + 2..]));
        assert_eq!(frames, vec![frame("message", "caf\u{e9} \u{1f600}")]);
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let mut decoder = StreamDecoder::new();
        let frames = decoder.feed_bytes(b"data: a\xFFb\n\n");
        assert_eq!(frames, vec![frame("message", "a\u{FFFD}b")]);
    }

    #[test]
    fn empty_frames_are_yielded_with_default_event() {
        let mut decoder = StreamDecoder::new();
        let frames = decoder.feed("\n\n");
        assert_eq!(frames, vec![frame("message", "")]);
    }
}
