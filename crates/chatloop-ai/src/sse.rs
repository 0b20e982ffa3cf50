//! Incremental server-sent-event framing for the turn stream.

/// Sentinel payload that terminates a turn stream.
pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq)]
/// One `data:` payload extracted from the stream.
pub enum SseFrame {
    Data(String),
    Done,
}

#[derive(Debug, Default)]
/// Buffers raw bytes until complete blank-line-delimited frames are available.
///
/// Chunk boundaries may fall anywhere, including inside a multi-byte UTF-8
/// sequence or between the `\r` and `\n` of a line ending.
pub struct SseFrameDecoder {
    text: String,
    pending_bytes: Vec<u8>,
}

impl SseFrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one transport chunk and returns every frame it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.append_utf8(chunk);
        let mut frames = Vec::new();
        while let Some(boundary) = self.text.find("\n\n") {
            let block: String = self.text.drain(..boundary + 2).collect();
            frames.extend(parse_frame_block(&block));
        }
        frames
    }

    /// Flushes a trailing frame that was not followed by a blank line.
    pub fn finish(&mut self) -> Vec<SseFrame> {
        if !self.pending_bytes.is_empty() {
            let tail = String::from_utf8_lossy(&self.pending_bytes).into_owned();
            self.pending_bytes.clear();
            self.text.push_str(&tail.replace('\r', ""));
        }
        let block = std::mem::take(&mut self.text);
        parse_frame_block(&block)
    }

    fn append_utf8(&mut self, chunk: &[u8]) {
        self.pending_bytes.extend_from_slice(chunk);
        let decoded = match std::str::from_utf8(&self.pending_bytes) {
            Ok(text) => {
                let text = text.to_string();
                self.pending_bytes.clear();
                text
            }
            Err(error) if error.error_len().is_none() => {
                // Incomplete sequence at the end; keep it for the next chunk.
                let valid = error.valid_up_to();
                let head = String::from_utf8_lossy(&self.pending_bytes[..valid]).into_owned();
                self.pending_bytes.drain(..valid);
                head
            }
            Err(_) => {
                let text = String::from_utf8_lossy(&self.pending_bytes).into_owned();
                self.pending_bytes.clear();
                text
            }
        };
        // Raw CR never occurs inside a JSON payload.
        self.text.push_str(&decoded.replace('\r', ""));
    }
}

/// Extracts the `data:` payloads of one frame block.
///
/// Each `data:` line is its own payload; comment, `event:` and `id:` lines are ignored.
pub fn parse_frame_block(block: &str) -> Vec<SseFrame> {
    block
        .lines()
        .filter_map(|line| {
            let data = line.trim().strip_prefix("data:")?.trim();
            if data.is_empty() {
                None
            } else if data == DONE_SENTINEL {
                Some(SseFrame::Done)
            } else {
                Some(SseFrame::Data(data.to_string()))
            }
        })
        .collect()
}
