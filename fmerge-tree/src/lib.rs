//! File metadata model and change history for fmerge
//!
//! This crate provides the building blocks that change detection runs on:
//! - File identity and metadata types (`File`, `FileKind`, `FileStats`)
//! - The in-memory metadata tree (`DirNode`, `MetadataNode`)
//! - The per-file change model (`Change`, `ChangeKind`) and its durable
//!   CSV change log under `.fmerge/`
//! - The disk scanner and the tree diff that derives new changes

pub mod change;
pub mod changelog;
pub mod diff;
pub mod errors;
pub mod file;
pub mod scan;
pub mod tree;

pub use change::{Change, ChangeKind};
pub use changelog::{
    build_tree_from_changes, decode_changes, encode_changes, read_changelog, write_changelog,
    ChangeLogStore, CHANGELOG_FILE, STATE_DIR,
};
pub use diff::{compare_trees, detect_changes};
pub use errors::{Result, TreeError};
pub use file::{join_path, split_path, File, FileKind, FileStats};
pub use scan::{file_stats, scan_tree, timestamp_now};
pub use tree::{DirNode, MetadataNode};
