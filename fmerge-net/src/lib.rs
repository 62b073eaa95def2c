//! TCP transport for fmerge sessions
//!
//! One socket per session. A dedicated reader task consumes frames and
//! hands each decoded message to a bounded pool of dispatch tasks; a
//! transmit mutex serializes emission so complete messages never interleave
//! on the wire. Disconnects surface as `ConnectionTerminated`.

pub mod connection;
pub mod endpoint;
pub mod errors;

pub use connection::{Connection, MessageHandler, MAX_DISPATCH_WORKERS};
pub use endpoint::{accept_peer, bind_listener, connect_to_peer, listen_for_peer, DEFAULT_PORT};
pub use errors::{NetError, Result};
