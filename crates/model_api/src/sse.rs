use chat_contract::GenerateContentResponse;
use serde_json::Value;
use tracing::debug;

/// One decoded `data:` frame.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Chunk(GenerateContentResponse),
    /// An `{"error": ...}` payload sent after the stream opened. `body` is the
    /// raw frame so the classifier can inspect its details.
    Error { status: Option<u16>, body: String },
}

/// Incremental parser for SSE byte streams.
///
/// Bytes are buffered until a blank line closes a frame, so multi-byte
/// characters split across network reads decode intact.
#[derive(Debug, Default)]
pub struct SseStreamParser {
    buffer: Vec<u8>,
}

impl SseStreamParser {
    /// Feed arbitrary bytes into the parser and drain complete frames.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<StreamFrame> {
        self.buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();

        while let Some((end, separator)) = find_frame_end(&self.buffer) {
            let raw: Vec<u8> = self.buffer.drain(..end + separator).take(end).collect();
            if let Some(frame) = decode_frame(&String::from_utf8_lossy(&raw)) {
                frames.push(frame);
            }
        }

        frames
    }

    /// Drains a final frame that was not followed by a blank line.
    pub fn finish(&mut self) -> Vec<StreamFrame> {
        let raw = std::mem::take(&mut self.buffer);
        decode_frame(&String::from_utf8_lossy(&raw))
            .into_iter()
            .collect()
    }

    /// Parse a complete SSE payload string in one shot.
    pub fn parse_frames(input: &str) -> Vec<StreamFrame> {
        let mut parser = Self::default();
        let mut frames = parser.feed(input.as_bytes());
        frames.extend(parser.finish());
        frames
    }

    pub fn is_empty_buffer(&self) -> bool {
        self.buffer.iter().all(u8::is_ascii_whitespace)
    }
}

/// Position of the first blank line and the length of its separator.
fn find_frame_end(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|window| window == b"\n\n");
    let crlf = buffer.windows(4).position(|window| window == b"\r\n\r\n");
    match (lf, crlf) {
        (Some(lf), Some(crlf)) if crlf < lf => Some((crlf, 4)),
        (Some(lf), _) => Some((lf, 2)),
        (None, Some(crlf)) => Some((crlf, 4)),
        (None, None) => None,
    }
}

fn extract_data_payload(frame: &str) -> Option<String> {
    let data_lines: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .collect();

    if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n"))
    }
}

fn decode_frame(frame: &str) -> Option<StreamFrame> {
    let payload = extract_data_payload(frame)?;
    if payload == "[DONE]" {
        return None;
    }

    let value = match serde_json::from_str::<Value>(&payload) {
        Ok(value) => value,
        Err(error) => {
            debug!(%error, "skipping malformed stream frame");
            return None;
        }
    };

    if let Some(error) = value.get("error").filter(|error| error.is_object()) {
        let status = error
            .get("code")
            .and_then(Value::as_u64)
            .and_then(|code| u16::try_from(code).ok());
        return Some(StreamFrame::Error {
            status,
            body: payload,
        });
    }

    match serde_json::from_value::<GenerateContentResponse>(value) {
        Ok(chunk) => Some(StreamFrame::Chunk(chunk)),
        Err(error) => {
            debug!(%error, "skipping stream frame with unexpected shape");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_split_across_reads_are_reassembled() {
        let mut parser = SseStreamParser::default();
        let frame = "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"héllo\"}]}}]}\n\n";
        let bytes = frame.as_bytes();
        let split = frame.find('é').expect("frame contains accent") + 1;

        assert!(parser.feed(&bytes[..split]).is_empty());
        let frames = parser.feed(&bytes[split..]);

        assert_eq!(frames.len(), 1);
        let StreamFrame::Chunk(chunk) = &frames[0] else {
            panic!("expected a chunk frame");
        };
        assert_eq!(chunk.text(), "héllo");
        assert!(parser.is_empty_buffer());
    }

    #[test]
    fn crlf_separated_frames_parse() {
        let frames = SseStreamParser::parse_frames(
            "data: {\"candidates\":[]}\r\n\r\ndata: {\"candidates\":[]}\r\n\r\n",
        );
        assert_eq!(frames.len(), 2);
    }
}
