//! Tree diffing: derive the changes between two metadata snapshots
//!
//! The "from" tree is the historical snapshot reconstructed from the change
//! log, the "to" tree is the current disk scan. The diff emits exactly the
//! records that, appended to the log, make it describe the current state.

use std::path::Path;

use tracing::{debug, warn};

use crate::change::{Change, ChangeKind};
use crate::changelog::{build_tree_from_changes, read_changelog};
use crate::errors::Result;
use crate::file::File;
use crate::scan::{scan_tree, timestamp_now};
use crate::tree::{DirNode, MetadataNode};

/// Compare two trees and return the changes that lead from `from` to `to`.
///
/// `now` is the observation timestamp recorded as the upper bound of
/// deletion ranges.
pub fn compare_trees(from: &DirNode, to: &DirNode, now: i64) -> Vec<Change> {
    let mut changes = Vec::new();

    // Pass 1: everything the old tree knows about that changed or vanished.
    from.visit(&mut |tokens, from_meta, is_dir| {
        let to_meta = if is_dir {
            to.get_dir(tokens).map(|d| &d.metadata)
        } else {
            to.get_file(tokens)
        };
        let path = tokens.join("/");
        changes.extend(compare_metadata(from_meta, to_meta, &path, now));
    });

    // Pass 2: entries that only exist in the new tree are creations.
    to.visit(&mut |tokens, to_meta, is_dir| {
        let from_meta = if is_dir {
            from.get_dir(tokens).map(|d| &d.metadata)
        } else {
            from.get_file(tokens)
        };
        if from_meta.is_none() {
            changes.push(Change {
                kind: ChangeKind::Creation,
                earliest: to_meta.mtime,
                latest: 0,
                file: File::new(tokens.join("/"), to_meta.kind),
            });
        }
    });

    changes
}

/// Determine what happened to a single entry present in the old tree.
fn compare_metadata(
    from: &MetadataNode,
    to: Option<&MetadataNode>,
    path: &str,
    now: i64,
) -> Vec<Change> {
    let Some(to) = to else {
        // Gone from disk. The deletion happened somewhere between the last
        // recorded mtime and this scan.
        return vec![Change {
            kind: ChangeKind::Deletion,
            earliest: from.mtime,
            latest: now,
            file: File::new(path, from.kind),
        }];
    };

    // Directory changes other than creation and deletion are suppressed:
    // directory mtimes churn with every child operation.
    if from.kind.is_dir() && to.kind.is_dir() {
        return Vec::new();
    }

    if from.kind != to.kind {
        // The old entry was replaced by one of a different kind.
        return vec![
            Change {
                kind: ChangeKind::Deletion,
                earliest: from.mtime,
                latest: to.mtime,
                file: File::new(path, from.kind),
            },
            Change {
                kind: ChangeKind::Modification,
                earliest: to.mtime,
                latest: 0,
                file: File::new(path, to.kind),
            },
        ];
    }

    if from.mtime < to.mtime {
        vec![Change {
            kind: ChangeKind::Modification,
            earliest: to.mtime,
            latest: 0,
            file: File::new(path, to.kind),
        }]
    } else if from.mtime > to.mtime {
        warn!(
            "Modification time of {} lies {}s in the future, ignoring",
            path,
            from.mtime - to.mtime
        );
        Vec::new()
    } else {
        Vec::new()
    }
}

/// Scan a sync root and derive the changes not yet present in its log.
pub fn detect_changes(root: &Path) -> Result<Vec<Change>> {
    let current = scan_tree(root)?;
    let history = read_changelog(root)?;
    let previous = build_tree_from_changes(&history);
    let changes = compare_trees(&previous, &current, timestamp_now());
    debug!(
        "Detected {} new changes under {}",
        changes.len(),
        root.display()
    );
    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::{split_path, FileKind};
    use crate::tree::MetadataNode;

    const NOW: i64 = 10_000;

    fn tree_with_file(path: &str, mtime: i64, kind: FileKind) -> DirNode {
        let mut tree = DirNode::new_root();
        let tokens = split_path(path);
        let name = tokens.last().unwrap().clone();
        if kind.is_dir() {
            tree.insert_dir(&tokens, MetadataNode::new(name, kind, mtime));
        } else {
            tree.insert_file(&tokens, MetadataNode::new(name, kind, mtime));
        }
        tree
    }

    #[test]
    fn test_identical_trees_yield_no_changes() {
        let tree = tree_with_file("a/b.txt", 500, FileKind::File);
        assert!(compare_trees(&tree, &tree.clone(), NOW).is_empty());
    }

    #[test]
    fn test_creation_detected() {
        let from = DirNode::new_root();
        let to = tree_with_file("new.txt", 1000, FileKind::File);

        let changes = compare_trees(&from, &to, NOW);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Creation);
        assert_eq!(changes[0].earliest, 1000);
        assert_eq!(changes[0].file.path, "new.txt");
    }

    #[test]
    fn test_deletion_detected_with_range() {
        let from = tree_with_file("old.txt", 400, FileKind::File);
        let to = DirNode::new_root();

        let changes = compare_trees(&from, &to, NOW);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Deletion);
        assert_eq!(changes[0].earliest, 400);
        assert_eq!(changes[0].latest, NOW);
    }

    #[test]
    fn test_modification_detected() {
        let from = tree_with_file("f", 100, FileKind::File);
        let to = tree_with_file("f", 200, FileKind::File);

        let changes = compare_trees(&from, &to, NOW);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Modification);
        assert_eq!(changes[0].earliest, 200);
    }

    #[test]
    fn test_clock_skew_suppressed() {
        let from = tree_with_file("f", 300, FileKind::File);
        let to = tree_with_file("f", 200, FileKind::File);
        assert!(compare_trees(&from, &to, NOW).is_empty());
    }

    #[test]
    fn test_directory_mtime_noise_suppressed() {
        let from = tree_with_file("d", 100, FileKind::Directory);
        let to = tree_with_file("d", 999, FileKind::Directory);
        assert!(compare_trees(&from, &to, NOW).is_empty());
    }

    #[test]
    fn test_kind_change_is_delete_plus_modify() {
        let from = tree_with_file("x", 100, FileKind::File);
        let to = tree_with_file("x", 200, FileKind::Link);

        let changes = compare_trees(&from, &to, NOW);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].kind, ChangeKind::Deletion);
        assert_eq!(changes[0].file.kind, FileKind::File);
        assert_eq!(changes[1].kind, ChangeKind::Modification);
        assert_eq!(changes[1].file.kind, FileKind::Link);
        assert_eq!(changes[1].earliest, 200);
    }

    #[test]
    fn test_diff_of_reconstructed_tree_is_empty() {
        // For any log L and tree T reconstructed from L, diff(T, T) is empty.
        let changes = vec![
            Change {
                kind: ChangeKind::Creation,
                earliest: 10,
                latest: 0,
                file: File::new("d", FileKind::Directory),
            },
            Change {
                kind: ChangeKind::Creation,
                earliest: 20,
                latest: 0,
                file: File::new("d/f", FileKind::File),
            },
        ];
        let tree = crate::changelog::build_tree_from_changes(&changes);
        assert!(compare_trees(&tree, &tree.clone(), NOW).is_empty());
    }
}
