//! Error types for session orchestration

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tree error: {0}")]
    Tree(#[from] fmerge_tree::TreeError),

    #[error("Network error: {0}")]
    Net(#[from] fmerge_net::NetError),

    #[error("Peer disconnected unexpectedly in state {state}")]
    UnexpectedDisconnect { state: String },

    #[error("Session aborted: {0}")]
    Aborted(String),

    #[error("Internal session error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
