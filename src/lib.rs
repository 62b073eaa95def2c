//! fmerge workspace root
//!
//! This crate serves as the root of the fmerge workspace and hosts the
//! integration tests that exercise interactions between the member crates,
//! up to full two-peer sessions over loopback TCP.

// Re-export the members for integration testing.
pub use fmerge_merge as merge;
pub use fmerge_net as net;
pub use fmerge_proto as proto;
pub use fmerge_sync as sync;
pub use fmerge_tree as tree;
