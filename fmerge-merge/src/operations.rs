//! File-operation derivation
//!
//! After a successful merge, each path's current and target histories are
//! squashed to effective mtimes and compared; the difference dictates at
//! most one operation per path. The queue drains in reverse lexicographic
//! path order so the contents of a doomed directory are handled before the
//! directory itself (`"d/f" > "d"`).

use std::collections::BTreeMap;

use tracing::warn;

use crate::change_set::{squash_changes, SortedChangeSet};

/// What has to happen to one path to reach the merged state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOperationKind {
    /// Fetch the file's current content from the peer.
    Transfer,
    /// Remove the local entry.
    Delete,
    /// Create a directory locally; needs no data from the peer.
    CreateFolder,
    /// Bookkeeping counter-operation for an overwritten local modification.
    /// Must always be squashed away; reaching a worker is a logic error.
    PlaceholderRevert,
}

impl std::fmt::Display for FileOperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FileOperationKind::Transfer => "TRANSFER",
            FileOperationKind::Delete => "DELETE",
            FileOperationKind::CreateFolder => "CREATE_FOLDER",
            FileOperationKind::PlaceholderRevert => "PLACEHOLDER_REVERT",
        };
        write!(f, "{}", name)
    }
}

/// One pending operation on one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOperation {
    pub kind: FileOperationKind,
    pub path: String,
}

impl FileOperation {
    pub fn new(kind: FileOperationKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

/// Operations keyed by path, ordered for deterministic processing.
pub type SortedOperationSet = BTreeMap<String, Vec<FileOperation>>;

/// Derive the operations that transform `current` into `target`.
///
/// `current` is the local pre-merge history, `target` the merged history.
/// Paths absent from `target` are untouched by the merge and need nothing.
pub fn construct_operation_set(
    current: &SortedChangeSet,
    target: &SortedChangeSet,
) -> SortedOperationSet {
    let mut ops: SortedOperationSet = BTreeMap::new();
    for (path, target_changes) in target {
        let current_changes = current.get(path).map(Vec::as_slice).unwrap_or(&[]);
        ops.insert(
            path.clone(),
            construct_operations(current_changes, target_changes, path),
        );
    }
    ops
}

fn construct_operations(
    current: &[fmerge_tree::Change],
    target: &[fmerge_tree::Change],
    path: &str,
) -> Vec<FileOperation> {
    let mut ops = Vec::new();

    let target_mtime = squash_changes(target);
    let current_mtime = squash_changes(current);
    // The modification time acts as the content fingerprint.
    if target_mtime == 0 {
        if current_mtime != 0 {
            // The file exists on disk but not in the target state.
            ops.push(FileOperation::new(FileOperationKind::Delete, path));
        }
    } else if target_mtime != current_mtime {
        ops.push(FileOperation::new(FileOperationKind::Transfer, path));
    }
    // Identical versions need nothing.

    ops
}

/// Reduce each path's operation chain to its final effective operation.
///
/// Renames do not exist, so only the last operation matters; paths whose
/// chain is empty are dropped entirely. This pass is also what eliminates
/// `PlaceholderRevert` bookkeeping entries.
pub fn squash_operations(ops: &SortedOperationSet) -> SortedOperationSet {
    let mut squashed: SortedOperationSet = BTreeMap::new();
    for (path, chain) in ops {
        match chain.last() {
            None => {}
            Some(op) if op.kind == FileOperationKind::PlaceholderRevert => {
                warn!("Dropping unsquashed placeholder revert for {}", path);
            }
            Some(op) => {
                squashed.insert(path.clone(), vec![op.clone()]);
            }
        }
    }
    squashed
}

/// Drains a squashed operation set in reverse lexicographic path order.
#[derive(Debug, Default)]
pub struct OperationQueue {
    ops: SortedOperationSet,
}

impl OperationQueue {
    pub fn new(ops: SortedOperationSet) -> Self {
        Self { ops }
    }

    /// Pop the lexicographically greatest remaining path, so `d/f` always
    /// comes out before `d`.
    pub fn pop(&mut self) -> Option<(String, Vec<FileOperation>)> {
        self.ops.pop_last()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
