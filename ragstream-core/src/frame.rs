//! Incremental framing of the chat response body.
//!
//! Contract:
//! - Frames are separated by a blank line (`"\n\n"`); the delimiter is not part of the frame.
//! - Bytes may arrive split anywhere, including inside a UTF-8 sequence or inside the delimiter.
//!   The output frame sequence does not depend on where the splits fall.
//! - A frame is emitted once, only after its delimiter has been seen. Whatever is left when the
//!   stream ends is dropped by [`FrameDecoder::flush`].

/// Frame separator on the wire.
pub const FRAME_DELIMITER: &str = "\n\n";

/// Stateful bytes → frames decoder. One instance per in-flight stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Decoded text not yet terminated by a delimiter.
    buf: String,
    /// Trailing bytes of an incomplete UTF-8 sequence from the previous chunk.
    partial: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every frame it completes, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        decode_utf8_incremental(&mut self.partial, chunk, &mut self.buf);

        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(rel) = self.buf[start..].find(FRAME_DELIMITER) {
            frames.push(self.buf[start..start + rel].to_owned());
            start += rel + FRAME_DELIMITER.len();
        }
        if start > 0 {
            self.buf.drain(..start);
        }
        frames
    }

    /// End of stream: drop any undelimited tail and pending partial bytes.
    pub fn flush(&mut self) {
        if !self.is_empty() {
            tracing::debug!(
                dropped_chars = self.buf.chars().count(),
                dropped_bytes = self.partial.len(),
                "discarding undelimited tail at end of stream"
            );
        }
        self.buf.clear();
        self.partial.clear();
    }

    /// Length in bytes of the buffered, not yet delimited text.
    pub fn residual_len(&self) -> usize {
        self.buf.len() + self.partial.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty() && self.partial.is_empty()
    }
}

/// Decode `chunk` (prefixed by `pending`) into `out`. An incomplete sequence at the end is left in
/// `pending` for the next call; invalid sequences become U+FFFD.
fn decode_utf8_incremental(pending: &mut Vec<u8>, chunk: &[u8], out: &mut String) {
    let joined;
    let mut input: &[u8] = if pending.is_empty() {
        chunk
    } else {
        let mut v = std::mem::take(pending);
        v.extend_from_slice(chunk);
        joined = v;
        &joined
    };

    loop {
        match std::str::from_utf8(input) {
            Ok(s) => {
                out.push_str(s);
                return;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&input[..valid]));
                match e.error_len() {
                    Some(bad) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        input = &input[valid + bad..];
                    }
                    None => {
                        pending.extend_from_slice(&input[valid..]);
                        return;
                    }
                }
            }
        }
    }
}
