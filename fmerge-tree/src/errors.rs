//! Error types for tree and change-log operations

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TreeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Out of file descriptors while scanning {path}: {source}")]
    FileDescriptorsExhausted {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed change record: {0}")]
    MalformedRecord(String),

    #[error("Change log is missing its terminator record")]
    MissingTerminator,

    #[error("Cannot scan {path}: not a directory")]
    NotADirectory { path: PathBuf },
}

pub type Result<T> = std::result::Result<T, TreeError>;
