//! Server-sent-events framing for streaming transports.

/// One vendor frame before normalization.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RawChunk {
    /// SSE `event:` name, when the vendor sends one.
    pub event: Option<String>,
    /// Joined `data:` lines.
    pub data: String,
}

impl RawChunk {
    pub fn new(event: Option<&str>, data: impl Into<String>) -> Self {
        Self {
            event: event.map(ToOwned::to_owned),
            data: data.into(),
        }
    }

    /// Data-only frame, as sent by Chat Completions style endpoints.
    pub fn data(data: impl Into<String>) -> Self {
        Self::new(None, data)
    }
}

/// Incremental SSE decoder; bytes may be split anywhere, including inside a
/// UTF-8 sequence.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    /// Prefix of `buf` already known to hold no complete delimiter.
    scanned: usize,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds bytes and returns every frame completed by them.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<RawChunk> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        // A delimiter may straddle the previous read, so back up by its length.
        let mut from = self.scanned.saturating_sub(3);
        while let Some((idx, delim_len)) = find_frame_delimiter(&self.buf, from) {
            let frame: Vec<u8> = self.buf.drain(..idx + delim_len).take(idx).collect();
            if let Some(frame) = parse_frame(&frame) {
                frames.push(frame);
            }
            from = 0;
        }
        self.scanned = self.buf.len();
        frames
    }

    /// Flushes a trailing frame that was not terminated by a blank line.
    pub fn finish(&mut self) -> Option<RawChunk> {
        let rest = std::mem::take(&mut self.buf);
        self.scanned = 0;
        parse_frame(&rest)
    }
}

fn find_frame_delimiter(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    (from..buf.len()).find_map(|i| {
        if buf[i..].starts_with(b"\r\n\r\n") {
            Some((i, 4))
        } else if buf[i..].starts_with(b"\n\n") {
            Some((i, 2))
        } else {
            None
        }
    })
}

fn parse_frame(bytes: &[u8]) -> Option<RawChunk> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    let text = String::from_utf8_lossy(bytes);
    let mut event = None;
    let mut data_lines: Vec<&str> = Vec::new();
    for raw_line in text.split('\n') {
        let line = raw_line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim_start().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    if event.is_none() && data_lines.is_empty() {
        return None;
    }
    Some(RawChunk {
        event,
        data: data_lines.join("\n"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_handles_partial_chunk_boundaries() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push_chunk(b"event: content_block_delta\ndata: {\"delta\":\"hel");
        assert!(frames.is_empty());
        let frames = decoder.push_chunk(b"lo\"}\n\ndata: [DONE]\n\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event.as_deref(), Some("content_block_delta"));
        assert_eq!(frames[0].data, "{\"delta\":\"hello\"}");
        assert_eq!(frames[1], RawChunk::data("[DONE]"));
    }

    #[test]
    fn decoder_accepts_crlf_and_skips_comments() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push_chunk(b": keep-alive\r\n\r\ndata: a\r\ndata: b\r\n\r\n");
        assert_eq!(frames, vec![RawChunk::data("a\nb")]);
    }

    #[test]
    fn finish_flushes_unterminated_frame() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push_chunk(b"data: {\"x\":1}").is_empty());
        assert_eq!(decoder.finish(), Some(RawChunk::data("{\"x\":1}")));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn multibyte_sequences_split_across_chunks_survive() {
        let mut decoder = SseDecoder::new();
        let bytes = "data: héllo\n\n".as_bytes();
        let split = "data: h".len() + 1;
        assert!(decoder.push_chunk(&bytes[..split]).is_empty());
        let frames = decoder.push_chunk(&bytes[split..]);
        assert_eq!(frames, vec![RawChunk::data("héllo")]);
    }

    #[test]
    fn byte_at_a_time_delivery_frames_once() {
        let mut decoder = SseDecoder::new();
        let payload = format!("data: {}\r\n\r\ndata: tail\n\n", "x".repeat(512));
        let mut frames = Vec::new();
        for byte in payload.as_bytes() {
            frames.extend(decoder.push_chunk(std::slice::from_ref(byte)));
        }
        assert_eq!(
            frames,
            vec![RawChunk::data("x".repeat(512)), RawChunk::data("tail")]
        );
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn delimiter_split_across_reads_is_found() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push_chunk(b"data: a\r\n\r").is_empty());
        assert_eq!(decoder.push_chunk(b"\n"), vec![RawChunk::data("a")]);
        assert!(decoder.push_chunk(b"data: b\n").is_empty());
        assert_eq!(decoder.push_chunk(b"\n"), vec![RawChunk::data("b")]);
    }
}
