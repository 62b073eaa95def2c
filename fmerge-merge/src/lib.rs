//! Merge engine for fmerge
//!
//! Unifies two per-file change histories into one merged history, detects
//! conflicts that cannot be fast-forwarded, and derives the minimal set of
//! filesystem operations required to reach the merged state.
//!
//! Both peers run this merge on the same inputs and must produce identical
//! results, so every path-keyed collection here is ordered.

pub mod change_set;
pub mod merge;
pub mod operations;

pub use change_set::{
    recombine_changes_by_file, sort_changes_by_file, squash_changes, SortedChangeSet,
};
pub use merge::{
    merge_change_sets, translate_peer_resolutions, Conflict, ConflictResolution,
    ConflictResolutionSet,
};
pub use operations::{
    construct_operation_set, squash_operations, FileOperation, FileOperationKind, OperationQueue,
    SortedOperationSet,
};
