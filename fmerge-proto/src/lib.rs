//! Wire protocol for fmerge peers
//!
//! Every message is a fixed 10-byte header followed by an opaque payload;
//! all multi-byte integers are little-endian. The protocol is symmetric and
//! self-describing: there is no request/response correlation at the framing
//! level, the application layer decides what each peer sends and when.

pub mod errors;
pub mod header;
pub mod messages;

pub use errors::{ProtoError, Result};
pub use header::{MessageHeader, HEADER_LEN, MAX_PAYLOAD_SIZE};
pub use messages::{FileTransferPayload, Message, MsgType};
