//! Error types for protocol encoding and decoding

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtoError {
    #[error("Payload shorter than claimed: needed {needed} more bytes")]
    Truncated { needed: usize },

    #[error("Payload of {length} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { length: u64, limit: u64 },

    #[error("Unknown message type {0}")]
    UnknownMessageType(u16),

    #[error("Invalid UTF-8 in {field}")]
    InvalidUtf8 { field: &'static str },

    #[error("Invalid conflict resolution value {0}")]
    InvalidResolution(i32),
}

pub type Result<T> = std::result::Result<T, ProtoError>;
