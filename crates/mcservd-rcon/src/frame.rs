//! RCON frame layout.
//!
//! Wire format, all integers little-endian:
//!
//! ```text
//! u32 size        byte length of everything after this field
//! u32 request_id
//! u32 kind        2 = command, 3 = authenticate
//! [u8] payload
//! u16 padding     always zero
//! ```
//!
//! Invariant: `size == 8 + payload.len() + 2`. A response whose `kind` is
//! [`KIND_AUTH_FAILED`] signals a rejected password.

use mcservd_core::FrameError;

/// Command request/response.
pub const KIND_COMMAND: u32 = 2;
/// Authentication request.
pub const KIND_AUTH: u32 = 3;
/// Sentinel on the kind field of an authentication-failure response.
pub const KIND_AUTH_FAILED: u32 = 0xFFFF_FFFF;

/// request_id + kind.
const PREFIX_LEN: usize = 8;
/// Trailing zero padding.
const SUFFIX_LEN: usize = 2;
/// The size field itself.
const SIZE_LEN: usize = 4;

/// One protocol message. Payload bytes are opaque and round-trip exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub request_id: u32,
    pub kind: u32,
    pub payload: Vec<u8>,
}

impl Frame {
    #[must_use]
    pub fn new(request_id: u32, kind: u32, payload: Vec<u8>) -> Self {
        Self {
            request_id,
            kind,
            payload,
        }
    }

    /// Value of the wire `size` field for this frame.
    fn size_field(&self) -> Result<u32, FrameError> {
        let size = PREFIX_LEN + self.payload.len() + SUFFIX_LEN;
        u32::try_from(size).map_err(|_| FrameError::PayloadTooLarge(self.payload.len()))
    }

    /// Encode into the full wire representation, size prefix included.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let size = self.size_field()?;
        let mut raw = Vec::with_capacity(SIZE_LEN + size as usize);
        raw.extend_from_slice(&size.to_le_bytes());
        raw.extend_from_slice(&self.request_id.to_le_bytes());
        raw.extend_from_slice(&self.kind.to_le_bytes());
        raw.extend_from_slice(&self.payload);
        raw.extend_from_slice(&0u16.to_le_bytes());
        Ok(raw)
    }

    /// Decode a complete frame from `raw`, which must contain the size
    /// prefix plus exactly the declared number of body bytes. The caller is
    /// responsible for having read a full frame off the stream first.
    pub fn decode(raw: &[u8]) -> Result<Self, FrameError> {
        if raw.len() < SIZE_LEN {
            return Err(FrameError::Truncated {
                expected: SIZE_LEN,
                got: raw.len(),
            });
        }
        let size = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
        let expected = SIZE_LEN + size;
        if size < PREFIX_LEN + SUFFIX_LEN || raw.len() < expected {
            return Err(FrameError::Truncated {
                expected,
                got: raw.len(),
            });
        }

        let request_id = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
        let kind = u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]);
        let payload = raw[SIZE_LEN + PREFIX_LEN..expected - SUFFIX_LEN].to_vec();

        Ok(Self {
            request_id,
            kind,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_arbitrary_payload_bytes() {
        let frame = Frame::new(42, KIND_COMMAND, vec![0x00, 0xff, b' ', 0x7f]);
        let raw = frame.encode().unwrap();
        assert_eq!(Frame::decode(&raw).unwrap(), frame);
    }

    #[test]
    fn round_trips_empty_payload() {
        let frame = Frame::new(u32::MAX, KIND_AUTH, vec![]);
        let raw = frame.encode().unwrap();
        // size = prefix + suffix only
        assert_eq!(&raw[0..4], &10u32.to_le_bytes());
        assert_eq!(Frame::decode(&raw).unwrap(), frame);
    }

    #[test]
    fn size_field_counts_everything_after_itself() {
        let frame = Frame::new(1, KIND_COMMAND, b"seed".to_vec());
        let raw = frame.encode().unwrap();
        assert_eq!(&raw[0..4], &(8u32 + 4 + 2).to_le_bytes());
        assert_eq!(raw.len(), 4 + 8 + 4 + 2);
        // trailing pad is zero
        assert_eq!(&raw[raw.len() - 2..], &[0, 0]);
    }

    #[test]
    fn decode_rejects_truncated_input() {
        let raw = Frame::new(7, KIND_COMMAND, b"list".to_vec())
            .encode()
            .unwrap();
        let err = Frame::decode(&raw[..raw.len() - 3]).unwrap_err();
        assert!(matches!(err, FrameError::Truncated { .. }));
    }

    #[test]
    fn decode_rejects_short_prefix() {
        assert!(matches!(
            Frame::decode(&[1, 0]),
            Err(FrameError::Truncated { .. })
        ));
    }

    #[test]
    fn decode_rejects_undersized_declared_length() {
        // declared size smaller than the fixed prefix+suffix
        let mut raw = vec![];
        raw.extend_from_slice(&4u32.to_le_bytes());
        raw.extend_from_slice(&[0u8; 4]);
        assert!(matches!(
            Frame::decode(&raw),
            Err(FrameError::Truncated { .. })
        ));
    }
}
