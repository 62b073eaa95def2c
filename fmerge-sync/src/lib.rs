//! Session orchestration for fmerge
//!
//! Drives one synchronization session from handshake to completion:
//! version negotiation, change-log exchange, the symmetric merge with
//! interactive conflict resolution, user confirmation, and the worker pool
//! that executes the resulting file operations.

pub mod errors;
pub mod resolver;
pub mod session;
pub mod state;
pub mod syncer;
pub mod ui;
pub mod version;

pub use errors::{Result, SyncError};
pub use session::{SessionConfig, SyncReport, SyncSession};
pub use state::SessionState;
pub use syncer::{Syncer, FILE_TRANSFER_TIMEOUT, MAX_SYNC_WORKERS};
pub use ui::{HeadlessUi, PromptOutcome, UserInterface};
pub use version::{check_peer_version, VersionCheck};
