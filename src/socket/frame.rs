//! Length-prefixed framing of the WhatsApp Web transport.
//!
//! Every frame is a 3-byte big-endian length followed by the payload. The
//! very first frame a client sends is additionally prefixed with the intro
//! header. WebSocket messages do not line up with frames, so the decoder
//! buffers input until whole frames are available.

use thiserror::Error;

/// `W`, `A`, magic 6, dictionary version 3.
pub const NOISE_WA_HEADER: [u8; 4] = [b'W', b'A', 6, 3];

/// Largest payload a 3-byte length can describe.
pub const MAX_FRAME_LEN: usize = (1 << 24) - 1;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame of {0} bytes exceeds the 3-byte length prefix")]
    TooLarge(usize),
}

#[derive(Debug, Default)]
pub struct FrameCodec {
    intro: Option<Vec<u8>>,
    buffer: Vec<u8>,
}

impl FrameCodec {
    /// Codec whose first encoded frame carries `intro`.
    pub fn new(intro: &[u8]) -> Self {
        Self {
            intro: Some(intro.to_vec()),
            buffer: Vec::new(),
        }
    }

    /// Codec that never writes an intro header (the server side).
    pub fn plain() -> Self {
        Self::default()
    }

    pub fn encode(&mut self, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
        if payload.len() > MAX_FRAME_LEN {
            return Err(FrameError::TooLarge(payload.len()));
        }
        let intro = self.intro.take().unwrap_or_default();

        let mut frame = Vec::with_capacity(intro.len() + 3 + payload.len());
        frame.extend_from_slice(&intro);
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes()[1..]);
        frame.extend_from_slice(payload);
        Ok(frame)
    }

    /// Append received bytes.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Next complete frame payload, if one is buffered.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        if self.buffer.len() < 3 {
            return None;
        }
        let len = u32::from_be_bytes([0, self.buffer[0], self.buffer[1], self.buffer[2]]) as usize;
        if self.buffer.len() < 3 + len {
            return None;
        }
        let frame = self.buffer[3..3 + len].to_vec();
        self.buffer.drain(..3 + len);
        Some(frame)
    }
}
