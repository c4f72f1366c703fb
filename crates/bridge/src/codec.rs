//! Length-prefixed record framing for the stdio link to the host process.
//!
//! Every record is a 4-byte little-endian payload length followed by that
//! many bytes of UTF-8 JSON. The decoder is resumable: bytes can arrive in
//! any chunking and frames are yielded as soon as they complete.

use bytes::{Buf, BytesMut};

use tabrelay_core::{CommandEnvelope, Error, ResponseEnvelope, Result};

pub const LENGTH_PREFIX_BYTES: usize = 4;
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>> {
    encode_frame_limited(payload, MAX_FRAME_BYTES)
}

pub fn encode_frame_limited(payload: &[u8], max_frame: usize) -> Result<Vec<u8>> {
    if payload.len() > max_frame {
        return Err(Error::Transport(format!(
            "outgoing frame of {} bytes exceeds {} byte limit",
            payload.len(),
            max_frame
        )));
    }
    let mut buf = Vec::with_capacity(LENGTH_PREFIX_BYTES + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

pub fn encode_command(env: &CommandEnvelope) -> Result<Vec<u8>> {
    encode_frame(&serde_json::to_vec(env)?)
}

pub fn encode_response(env: &ResponseEnvelope) -> Result<Vec<u8>> {
    encode_frame(&serde_json::to_vec(env)?)
}

pub fn decode_command(payload: &[u8]) -> Result<CommandEnvelope> {
    Ok(serde_json::from_slice(payload)?)
}

pub fn decode_response(payload: &[u8]) -> Result<ResponseEnvelope> {
    Ok(serde_json::from_slice(payload)?)
}

/// Incremental frame decoder. Feed bytes with [`push`](Self::push), drain
/// complete frames with [`next_frame`](Self::next_frame).
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_frame: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_limit(MAX_FRAME_BYTES)
    }

    pub fn with_limit(max_frame: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_frame,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Next complete frame, if the buffer holds one.
    ///
    /// A length prefix over the limit is an error for that record only: the
    /// four prefix bytes are consumed and decoding resumes at the byte after
    /// them, back in awaiting-length state.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        if self.buf.len() < LENGTH_PREFIX_BYTES {
            return Ok(None);
        }
        let mut prefix = [0u8; LENGTH_PREFIX_BYTES];
        prefix.copy_from_slice(&self.buf[..LENGTH_PREFIX_BYTES]);
        let len = u32::from_le_bytes(prefix) as usize;

        if len > self.max_frame {
            self.buf.advance(LENGTH_PREFIX_BYTES);
            return Err(Error::Transport(format!(
                "frame length {} exceeds {} byte limit",
                len, self.max_frame
            )));
        }
        if self.buf.len() < LENGTH_PREFIX_BYTES + len {
            return Ok(None);
        }

        self.buf.advance(LENGTH_PREFIX_BYTES);
        let payload = self.buf.split_to(len);
        Ok(Some(payload.to_vec()))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_round_trip_single_frame() {
        let frame = encode_frame(br#"{"requestId":1}"#).unwrap();
        let mut decoder = FrameDecoder::new();
        decoder.push(&frame);
        let payload = decoder.next_frame().unwrap().unwrap();
        assert_eq!(payload, br#"{"requestId":1}"#);
        assert!(decoder.next_frame().unwrap().is_none());
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_byte_at_a_time_chunking() {
        let env = CommandEnvelope {
            request_id: 9,
            command: "navigate".to_string(),
            params: json!({"url": "https://example.com"}),
            tab_id: None,
        };
        let frame = encode_command(&env).unwrap();

        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        for byte in &frame {
            decoder.push(std::slice::from_ref(byte));
            if let Some(payload) = decoder.next_frame().unwrap() {
                frames.push(payload);
            }
        }
        assert_eq!(frames.len(), 1);
        let decoded = decode_command(&frames[0]).unwrap();
        assert_eq!(decoded.request_id, 9);
        assert_eq!(decoded.command, "navigate");
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let a = encode_frame(b"first").unwrap();
        let b = encode_frame(b"second").unwrap();
        let mut joined = a;
        joined.extend_from_slice(&b);

        let mut decoder = FrameDecoder::new();
        decoder.push(&joined);
        assert_eq!(decoder.next_frame().unwrap().unwrap(), b"first");
        assert_eq!(decoder.next_frame().unwrap().unwrap(), b"second");
        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_empty_payload_frame() {
        let frame = encode_frame(b"").unwrap();
        assert_eq!(frame.len(), LENGTH_PREFIX_BYTES);
        let mut decoder = FrameDecoder::new();
        decoder.push(&frame);
        assert_eq!(decoder.next_frame().unwrap().unwrap(), b"");
    }

    #[test]
    fn test_partial_prefix_waits() {
        let mut decoder = FrameDecoder::new();
        decoder.push(&[5, 0]);
        assert!(decoder.next_frame().unwrap().is_none());
        decoder.push(&[0, 0]);
        assert!(decoder.next_frame().unwrap().is_none());
        decoder.push(b"hello");
        assert_eq!(decoder.next_frame().unwrap().unwrap(), b"hello");
    }

    #[test]
    fn test_oversize_length_recovers_at_next_record() {
        let mut decoder = FrameDecoder::with_limit(1024);
        // corrupt prefix claiming 16 MiB, followed immediately by a valid record
        let mut stream = (16u32 * 1024 * 1024).to_le_bytes().to_vec();
        stream.extend_from_slice(&encode_frame(b"after").unwrap());
        decoder.push(&stream);

        let err = decoder.next_frame().unwrap_err();
        assert!(err.to_string().contains("exceeds 1024 byte limit"));
        // the decoder consumed only the bad prefix; the next record parses
        assert_eq!(decoder.next_frame().unwrap().unwrap(), b"after");
    }

    #[test]
    fn test_encode_rejects_oversize_payload() {
        let payload = vec![0u8; 2048];
        let err = encode_frame_limited(&payload, 1024).unwrap_err();
        assert!(err.to_string().contains("exceeds 1024 byte limit"));
    }
}
