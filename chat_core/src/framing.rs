// rsa_chat/chat_core/src/framing.rs
//
// Transport framing: a 10-byte left-justified decimal ASCII length header
// followed by exactly that many body bytes.

use crate::error::ChatError;

pub const HEADER_SIZE: usize = 10;

/// Prepends the length header to a frame body.
pub fn encode_frame(body: &[u8]) -> Vec<u8> {
    let mut frame = format!("{:<width$}", body.len(), width = HEADER_SIZE).into_bytes();
    frame.extend_from_slice(body);
    frame
}

/// Stateful reassembler turning arbitrarily chunked reads into frame bodies.
///
/// Strictly sequential: one header is parsed at a time and the next header
/// is only looked at after the current body is complete and yielded.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    expected: Option<usize>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers one chunk from the transport.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Yields the next complete frame body, or `None` until more bytes
    /// arrive. Call in a loop to drain several frames from one read.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, ChatError> {
        if self.expected.is_none() {
            if self.buffer.len() < HEADER_SIZE {
                return Ok(None);
            }
            let header: Vec<u8> = self.buffer.drain(..HEADER_SIZE).collect();
            let header = std::str::from_utf8(&header)
                .map_err(|_| ChatError::Protocol("frame header is not ASCII".to_string()))?;
            let length = header.trim_end().parse::<usize>().map_err(|_| {
                ChatError::Protocol(format!("frame header '{}' is not a decimal length", header))
            })?;
            self.expected = Some(length);
        }

        let length = self.expected.unwrap_or(0);
        if self.buffer.len() < length {
            return Ok(None);
        }
        let body: Vec<u8> = self.buffer.drain(..length).collect();
        self.expected = None;
        Ok(Some(body))
    }
}
