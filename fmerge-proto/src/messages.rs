//! Message taxonomy and payload codecs
//!
//! The original design's per-type serializer hierarchy collapses to one sum
//! type whose variants carry their payload structures; the discriminant
//! values on the wire are fixed and must never be reordered.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use fmerge_merge::{ConflictResolution, ConflictResolutionSet};
use fmerge_tree::{decode_changes, encode_changes, Change, FileKind};

use crate::errors::{ProtoError, Result};
use crate::header::MessageHeader;

/// Message type discriminants on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MsgType {
    Unknown = 0,
    Ignore = 1,
    Version = 2,
    Changes = 3,
    FileTransfer = 4,
    FileRequest = 5,
    ExitingState = 6,
    ConflictResolutions = 7,
}

impl MsgType {
    pub fn from_wire(value: u16) -> Option<Self> {
        match value {
            0 => Some(MsgType::Unknown),
            1 => Some(MsgType::Ignore),
            2 => Some(MsgType::Version),
            3 => Some(MsgType::Changes),
            4 => Some(MsgType::FileTransfer),
            5 => Some(MsgType::FileRequest),
            6 => Some(MsgType::ExitingState),
            7 => Some(MsgType::ConflictResolutions),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u16 {
        self as u16
    }
}

impl std::fmt::Display for MsgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MsgType::Unknown => "Unknown",
            MsgType::Ignore => "Ignore",
            MsgType::Version => "Version",
            MsgType::Changes => "Changes",
            MsgType::FileTransfer => "FileTransfer",
            MsgType::FileRequest => "FileRequest",
            MsgType::ExitingState => "ExitingState",
            MsgType::ConflictResolutions => "ConflictResolutions",
        };
        write!(f, "{}", name)
    }
}

/// Payload of a `FileTransfer` message.
///
/// ```text
///   8  mtime     i64 LE
///   8  atime     i64 LE
///   1  kind      u8  (FileKind discriminant)
///   2  path_len  u16 LE
///   P  path      bytes, no NUL terminator
///   B  body      rest of payload
/// ```
///
/// The body is the raw contents for a file, the target path for a link and
/// empty for a directory. A payload with kind `Unknown` signals that the
/// peer could not produce the requested file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTransferPayload {
    pub path: String,
    pub kind: FileKind,
    pub mtime: i64,
    pub atime: i64,
    pub body: Bytes,
}

impl FileTransferPayload {
    /// The failure response for a request that could not be served.
    pub fn missing(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: FileKind::Unknown,
            mtime: 0,
            atime: 0,
            body: Bytes::new(),
        }
    }
}

/// A protocol message with its typed payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Ignore,
    /// `"<version>;<uuid>"` as UTF-8.
    Version(String),
    /// A serialized change log, terminator record included on the wire.
    Changes(Vec<Change>),
    /// Path of the file the peer should send back, relative to its root.
    FileRequest(String),
    FileTransfer(FileTransferPayload),
    /// The state id the sender is leaving (see the session state machine).
    ExitingState(i32),
    ConflictResolutions(ConflictResolutionSet),
}

impl Message {
    pub fn msg_type(&self) -> MsgType {
        match self {
            Message::Ignore => MsgType::Ignore,
            Message::Version(_) => MsgType::Version,
            Message::Changes(_) => MsgType::Changes,
            Message::FileRequest(_) => MsgType::FileRequest,
            Message::FileTransfer(_) => MsgType::FileTransfer,
            Message::ExitingState(_) => MsgType::ExitingState,
            Message::ConflictResolutions(_) => MsgType::ConflictResolutions,
        }
    }

    /// Encode just the payload bytes.
    pub fn encode_payload(&self) -> Bytes {
        match self {
            Message::Ignore => Bytes::new(),
            Message::Version(version) => Bytes::copy_from_slice(version.as_bytes()),
            Message::Changes(changes) => Bytes::from(encode_changes(changes).into_bytes()),
            Message::FileRequest(path) => Bytes::copy_from_slice(path.as_bytes()),
            Message::FileTransfer(payload) => {
                let mut buf =
                    BytesMut::with_capacity(19 + payload.path.len() + payload.body.len());
                buf.put_i64_le(payload.mtime);
                buf.put_i64_le(payload.atime);
                buf.put_u8(payload.kind.to_wire());
                buf.put_u16_le(payload.path.len() as u16);
                buf.put_slice(payload.path.as_bytes());
                buf.put_slice(&payload.body);
                buf.freeze()
            }
            Message::ExitingState(state) => {
                let mut buf = BytesMut::with_capacity(4);
                buf.put_i32_le(*state);
                buf.freeze()
            }
            Message::ConflictResolutions(resolutions) => {
                let mut buf = BytesMut::new();
                for (path, resolution) in resolutions {
                    buf.put_u16_le(path.len() as u16);
                    buf.put_slice(path.as_bytes());
                    buf.put_i32_le(resolution.to_wire());
                }
                buf.freeze()
            }
        }
    }

    /// Encode the full frame: header followed by payload.
    pub fn encode_frame(&self) -> Bytes {
        let payload = self.encode_payload();
        let header = MessageHeader::new(self.msg_type().to_wire(), payload.len() as u64);
        let mut frame = BytesMut::with_capacity(payload.len() + header.encode().len());
        frame.put_slice(&header.encode());
        frame.put_slice(&payload);
        frame.freeze()
    }

    /// Decode a payload of a known message type.
    pub fn decode(msg_type: MsgType, mut payload: Bytes) -> Result<Message> {
        match msg_type {
            MsgType::Unknown => Err(ProtoError::UnknownMessageType(0)),
            MsgType::Ignore => Ok(Message::Ignore),
            MsgType::Version => {
                let len = payload.len();
                Ok(Message::Version(take_string(&mut payload, len, "version")?))
            }
            MsgType::Changes => {
                let text = std::str::from_utf8(&payload)
                    .map_err(|_| ProtoError::InvalidUtf8 { field: "changes" })?;
                Ok(Message::Changes(decode_changes(text)))
            }
            MsgType::FileRequest => {
                let len = payload.len();
                Ok(Message::FileRequest(take_string(&mut payload, len, "path")?))
            }
            MsgType::FileTransfer => decode_file_transfer(payload),
            MsgType::ExitingState => {
                ensure_remaining(&payload, 4)?;
                Ok(Message::ExitingState(payload.get_i32_le()))
            }
            MsgType::ConflictResolutions => decode_resolutions(payload),
        }
    }
}

fn decode_file_transfer(mut payload: Bytes) -> Result<Message> {
    ensure_remaining(&payload, 19)?;
    let mtime = payload.get_i64_le();
    let atime = payload.get_i64_le();
    let kind = FileKind::from_wire(payload.get_u8());
    let path_len = payload.get_u16_le() as usize;
    let path = take_string(&mut payload, path_len, "path")?;

    Ok(Message::FileTransfer(FileTransferPayload {
        path,
        kind,
        mtime,
        atime,
        body: payload,
    }))
}

fn decode_resolutions(mut payload: Bytes) -> Result<Message> {
    let mut resolutions = ConflictResolutionSet::new();
    while payload.has_remaining() {
        ensure_remaining(&payload, 2)?;
        let key_len = payload.get_u16_le() as usize;
        let key = take_string(&mut payload, key_len, "resolution key")?;
        ensure_remaining(&payload, 4)?;
        let choice = payload.get_i32_le();
        let resolution =
            ConflictResolution::from_wire(choice).ok_or(ProtoError::InvalidResolution(choice))?;
        resolutions.insert(key, resolution);
    }
    Ok(Message::ConflictResolutions(resolutions))
}

fn ensure_remaining(buf: &Bytes, needed: usize) -> Result<()> {
    if buf.remaining() < needed {
        return Err(ProtoError::Truncated {
            needed: needed - buf.remaining(),
        });
    }
    Ok(())
}

fn take_string(buf: &mut Bytes, len: usize, field: &'static str) -> Result<String> {
    ensure_remaining(buf, len)?;
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| ProtoError::InvalidUtf8 { field })
}
