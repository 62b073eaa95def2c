//! Error types for transport operations

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection terminated")]
    ConnectionTerminated,

    #[error("No IPv4 address found for {host}")]
    NoIpv4Address { host: String },

    #[error("Protocol error: {0}")]
    Proto(#[from] fmerge_proto::ProtoError),
}

pub type Result<T> = std::result::Result<T, NetError>;
