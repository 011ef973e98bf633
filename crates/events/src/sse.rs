//! Incremental decoder for `text/event-stream` batch responses.
//!
//! The server writes one frame per event: `data: {json}\n\n`. Network
//! chunks do not respect frame boundaries, so [`SseDecoder`] keeps the
//! trailing partial line between calls to [`SseDecoder::push`]. Each byte
//! is scanned for a line break once, and no line may grow past
//! [`MAX_LINE_BYTES`].

use promptreel_core::event::BatchEvent;

const DATA_PREFIX: &str = "data:";

/// Longest accepted line. A `complete` event carries every result of the
/// batch, so this is generous.
pub const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// A complete `data:` line could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Event line is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Malformed event payload: {0}")]
    Json(#[from] serde_json::Error),

    /// The line was dropped up to its next line break.
    #[error("Event line of at least {len} bytes exceeds the {max} byte limit")]
    LineTooLong { len: usize, max: usize },
}

#[derive(Debug)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already known to hold no line break.
    scanned: usize,
    max_line: usize,
    /// Dropping the rest of an oversized line.
    discarding: bool,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            max_line,
            discarding: false,
        }
    }

    /// Feed one network chunk and return every event completed by it, in
    /// stream order.
    ///
    /// Lines that are not `data:` lines (comments, blank separators,
    /// `event:`/`id:` fields) are skipped. An oversized line yields one
    /// [`DecodeError::LineTooLong`] and decoding resumes after it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<BatchEvent, DecodeError>> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
            let newline = self.scanned + offset;
            let line = &self.buffer[start..newline];

            if self.discarding {
                self.discarding = false;
            } else if line.len() > self.max_line {
                events.push(Err(DecodeError::LineTooLong {
                    len: line.len(),
                    max: self.max_line,
                }));
            } else if let Some(event) = Self::decode_line(line) {
                events.push(event);
            }

            start = newline + 1;
            self.scanned = start;
        }

        self.buffer.drain(..start);
        self.scanned = self.buffer.len();

        if !self.discarding && self.buffer.len() > self.max_line {
            events.push(Err(DecodeError::LineTooLong {
                len: self.buffer.len(),
                max: self.max_line,
            }));
            self.discarding = true;
        }
        if self.discarding {
            self.buffer.clear();
            self.scanned = 0;
        }
        events
    }

    /// Decode whatever is left once the stream has ended.
    ///
    /// A well-formed stream leaves nothing behind; a final line without its
    /// newline is still decoded.
    pub fn finish(mut self) -> Option<Result<BatchEvent, DecodeError>> {
        if self.discarding {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        Self::decode_line(&rest)
    }

    fn decode_line(line: &[u8]) -> Option<Result<BatchEvent, DecodeError>> {
        let line = match String::from_utf8(line.to_vec()) {
            Ok(line) => line,
            Err(e) => return Some(Err(e.into())),
        };
        let line = line.trim_end_matches('\r');

        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            if !line.is_empty() {
                tracing::trace!(line, "Skipping non-data SSE line");
            }
            return None;
        };

        let payload = payload.trim_start();
        if payload.is_empty() {
            return None;
        }
        Some(serde_json::from_str(payload).map_err(DecodeError::from))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use promptreel_core::event::ItemResult;
    use promptreel_core::types::AssetRef;

    use super::*;

    fn frame(event: &BatchEvent) -> String {
        format!("data: {}\n\n", serde_json::to_string(event).unwrap())
    }

    fn decoded(results: Vec<Result<BatchEvent, DecodeError>>) -> Vec<BatchEvent> {
        results.into_iter().map(|r| r.unwrap()).collect()
    }

    #[test]
    fn decodes_whole_frames() {
        let progress = BatchEvent::progress(1, 2, "Generating image 1");
        let result = BatchEvent::Result {
            result: ItemResult::succeeded(0, "A", AssetRef::remote("https://cdn/a.jpg")),
        };
        let body = format!("{}{}", frame(&progress), frame(&result));

        let mut decoder = SseDecoder::new();
        assert_eq!(decoded(decoder.push(body.as_bytes())), vec![progress, result]);
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn frame_split_across_chunks_is_decoded_once() {
        let event = BatchEvent::Result {
            result: ItemResult::failed(3, "D", "timed out"),
        };
        let body = frame(&event);
        let (head, tail) = body.as_bytes().split_at(body.len() / 2);

        let mut decoder = SseDecoder::new();
        assert!(decoder.push(head).is_empty());
        assert_eq!(decoded(decoder.push(tail)), vec![event]);
    }

    #[test]
    fn byte_at_a_time_delivery() {
        let events = vec![
            BatchEvent::progress(1, 1, "Generating image 1"),
            BatchEvent::Complete { results: vec![] },
        ];
        let body: String = events.iter().map(frame).collect();

        let mut decoder = SseDecoder::new();
        let mut out = Vec::new();
        for byte in body.as_bytes() {
            out.extend(decoded(decoder.push(std::slice::from_ref(byte))));
        }
        assert_eq!(out, events);
    }

    #[test]
    fn comments_and_crlf_are_tolerated() {
        let body = ": keep-alive\r\ndata: {\"type\":\"error\",\"error\":\"boom\"}\r\n\r\n";
        let mut decoder = SseDecoder::new();
        assert_eq!(decoded(decoder.push(body.as_bytes())), vec![BatchEvent::error("boom")]);
    }

    #[test]
    fn malformed_payload_is_reported_and_decoding_continues() {
        let body = format!(
            "data: {{\"type\":\"nope\"}}\n\n{}",
            frame(&BatchEvent::error("later"))
        );
        let mut decoder = SseDecoder::new();
        let results = decoder.push(body.as_bytes());

        assert_eq!(results.len(), 2);
        assert!(matches!(results[0], Err(DecodeError::Json(_))));
        assert_eq!(results[1].as_ref().unwrap(), &BatchEvent::error("later"));
    }

    #[test]
    fn trailing_line_without_newline_is_decoded_on_finish() {
        let mut decoder = SseDecoder::new();
        assert!(decoder
            .push(br#"data: {"type":"error","error":"cut"}"#)
            .is_empty());
        assert_eq!(decoder.finish().unwrap().unwrap(), BatchEvent::error("cut"));
    }

    #[test]
    fn oversized_line_is_rejected_and_decoding_resumes() {
        let mut decoder = SseDecoder::with_max_line(64);
        let long = format!("data: {}", "x".repeat(100));
        let (head, tail) = long.as_bytes().split_at(70);

        let results = decoder.push(head);
        assert_eq!(results.len(), 1);
        assert!(matches!(
            results[0],
            Err(DecodeError::LineTooLong { max: 64, .. })
        ));

        assert!(decoder.push(tail).is_empty());
        let after = frame(&BatchEvent::error("next"));
        let mut rest = b"\n".to_vec();
        rest.extend_from_slice(after.as_bytes());
        assert_eq!(decoded(decoder.push(&rest)), vec![BatchEvent::error("next")]);
    }

    #[test]
    fn complete_oversized_line_in_one_chunk_is_rejected() {
        let mut decoder = SseDecoder::with_max_line(64);
        let body = format!("data: {}\n{}", "y".repeat(80), frame(&BatchEvent::error("ok")));

        let results = decoder.push(body.as_bytes());
        assert_eq!(results.len(), 2);
        assert!(matches!(results[0], Err(DecodeError::LineTooLong { len: 86, .. })));
        assert_eq!(results[1].as_ref().unwrap(), &BatchEvent::error("ok"));
    }

    #[test]
    fn partial_line_is_not_rescanned_as_complete() {
        let mut decoder = SseDecoder::new();
        let body = frame(&BatchEvent::error("slow"));
        let (head, tail) = body.as_bytes().split_at(10);

        for _ in 0..3 {
            assert!(decoder.push(&[]).is_empty());
        }
        assert!(decoder.push(head).is_empty());
        assert!(decoder.push(&[]).is_empty());
        assert_eq!(decoded(decoder.push(tail)), vec![BatchEvent::error("slow")]);
        assert!(decoder.finish().is_none());
    }
}
