//! Path-keyed change histories
//!
//! A flat change log is bucketed into per-path histories for merging. The
//! per-path causal order is preserved; the global interleaving is not, and
//! does not survive a round-trip through `recombine_changes_by_file`.

use std::collections::BTreeMap;

use tracing::warn;

use fmerge_tree::{Change, ChangeKind};

/// Mapping from path to that file's ordered change history.
///
/// Ordered so that both peers iterate identically during the merge.
pub type SortedChangeSet = BTreeMap<String, Vec<Change>>;

/// Bucket a flat change log by path, preserving per-path order.
pub fn sort_changes_by_file(changes: Vec<Change>) -> SortedChangeSet {
    let mut sorted: SortedChangeSet = BTreeMap::new();
    for change in changes {
        sorted
            .entry(change.file.path.clone())
            .or_default()
            .push(change);
    }
    sorted
}

/// Flatten a sorted change set back into one log.
pub fn recombine_changes_by_file(changes: SortedChangeSet) -> Vec<Change> {
    changes.into_values().flatten().collect()
}

/// Reduce a change history to the file's effective mtime.
///
/// Returns 0 iff the file does not exist after applying the sequence (empty
/// history or a final deletion). The mtime acts as the content fingerprint:
/// two states are the same version iff their squashed mtimes are equal.
pub fn squash_changes(changes: &[Change]) -> i64 {
    let Some(last) = changes.last() else {
        return 0;
    };
    match last.kind {
        ChangeKind::Creation | ChangeKind::Modification => last.earliest,
        ChangeKind::Deletion => 0,
        other => {
            warn!(
                "Unhandled change kind {} while squashing {}",
                other, last.file.path
            );
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fmerge_tree::{File, FileKind};

    fn change(kind: ChangeKind, mtime: i64, path: &str) -> Change {
        Change {
            kind,
            earliest: mtime,
            latest: 0,
            file: File::new(path, FileKind::File),
        }
    }

    #[test]
    fn test_sort_preserves_per_path_order() {
        let log = vec![
            change(ChangeKind::Creation, 10, "a"),
            change(ChangeKind::Creation, 5, "b"),
            change(ChangeKind::Modification, 20, "a"),
        ];
        let sorted = sort_changes_by_file(log);

        assert_eq!(sorted.len(), 2);
        let a = &sorted["a"];
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].kind, ChangeKind::Creation);
        assert_eq!(a[1].kind, ChangeKind::Modification);
    }

    #[test]
    fn test_recombine_keeps_every_change() {
        let log = vec![
            change(ChangeKind::Creation, 10, "a"),
            change(ChangeKind::Creation, 5, "b"),
            change(ChangeKind::Modification, 20, "a"),
        ];
        let recombined = recombine_changes_by_file(sort_changes_by_file(log.clone()));
        assert_eq!(recombined.len(), log.len());
        // Per-path order survives even though the global order may not.
        let a: Vec<_> = recombined.iter().filter(|c| c.file.path == "a").collect();
        assert_eq!(a[0].kind, ChangeKind::Creation);
        assert_eq!(a[1].kind, ChangeKind::Modification);
    }

    #[test]
    fn test_squash_takes_final_mtime() {
        let history = vec![
            change(ChangeKind::Creation, 10, "f"),
            change(ChangeKind::Modification, 30, "f"),
        ];
        assert_eq!(squash_changes(&history), 30);
    }

    #[test]
    fn test_squash_deletion_is_zero() {
        let history = vec![
            change(ChangeKind::Creation, 10, "f"),
            change(ChangeKind::Deletion, 10, "f"),
        ];
        assert_eq!(squash_changes(&history), 0);
        assert_eq!(squash_changes(&[]), 0);
    }
}
