//! Frame header
//!
//! ```text
//! offset  size  field
//!   0       2   type     u16 LE (MsgType discriminant)
//!   2       8   length   u64 LE (payload length, header not included)
//! ```

use bytes::{Buf, BufMut};

use crate::errors::{ProtoError, Result};

/// Size of the fixed frame header in bytes.
pub const HEADER_LEN: usize = 10;

/// Upper bound on a single payload. Files are sent whole, so this has to
/// accommodate large transfers while still rejecting nonsense lengths from
/// a corrupted stream.
pub const MAX_PAYLOAD_SIZE: u64 = 8 * 1024 * 1024 * 1024;

/// The fixed header preceding every message on the wire.
///
/// The type is kept as the raw wire value so that unknown message types can
/// be skipped (payload consumed, message discarded) without tearing down
/// the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub raw_type: u16,
    pub length: u64,
}

impl MessageHeader {
    pub fn new(raw_type: u16, length: u64) -> Self {
        Self { raw_type, length }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        let mut cursor = &mut buf[..];
        cursor.put_u16_le(self.raw_type);
        cursor.put_u64_le(self.length);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.remaining() < HEADER_LEN {
            return Err(ProtoError::Truncated {
                needed: HEADER_LEN - buf.remaining(),
            });
        }
        let raw_type = buf.get_u16_le();
        let length = buf.get_u64_le();
        if length > MAX_PAYLOAD_SIZE {
            return Err(ProtoError::PayloadTooLarge {
                length,
                limit: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(Self { raw_type, length })
    }
}
