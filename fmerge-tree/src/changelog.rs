//! Durable change-log persistence
//!
//! The change log lives at `<root>/.fmerge/filechanges.db` as line-oriented
//! CSV, terminated by a `TerminateList` record. Within a session the log is
//! append-only; after a successful merge it is rewritten whole.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::change::{Change, ChangeKind};
use crate::errors::Result;
use crate::file::split_path;
use crate::tree::{DirNode, MetadataNode};

/// Directory under the sync root holding fmerge state. Always excluded from
/// scanning and syncing.
pub const STATE_DIR: &str = ".fmerge";

/// File name of the persisted change log inside [`STATE_DIR`].
pub const CHANGELOG_FILE: &str = "filechanges.db";

/// Serialize a change list, appending the terminator record.
pub fn encode_changes(changes: &[Change]) -> String {
    let mut out = String::new();
    for change in changes {
        change.encode_csv(&mut out);
    }
    Change::terminator().encode_csv(&mut out);
    out
}

/// Parse a serialized change list.
///
/// Reading stops at the `TerminateList` record. Malformed lines are reported
/// and skipped; a missing terminator ends parsing at end of input with a
/// warning.
pub fn decode_changes(input: &str) -> Vec<Change> {
    let mut changes = Vec::new();
    for (lineno, line) in input.lines().enumerate() {
        match Change::decode_csv(line) {
            Ok(change) if change.kind == ChangeKind::TerminateList => return changes,
            Ok(change) => changes.push(change),
            Err(err) => {
                warn!("Skipping malformed change record on line {}: {}", lineno + 1, err);
            }
        }
    }
    warn!("Change list ended without a terminator record");
    changes
}

/// Handle on the persisted change log of one sync root.
#[derive(Debug, Clone)]
pub struct ChangeLogStore {
    root: PathBuf,
}

impl ChangeLogStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn log_path(&self) -> PathBuf {
        self.root.join(STATE_DIR).join(CHANGELOG_FILE)
    }

    /// Read the full change log. A missing file yields an empty history.
    pub fn read(&self) -> Result<Vec<Change>> {
        let path = self.log_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&path)?;
        let changes = decode_changes(&contents);
        debug!("Read {} changes from {}", changes.len(), path.display());
        Ok(changes)
    }

    /// Append new changes, rewriting the whole log with its terminator.
    pub fn append(&self, new_changes: &[Change]) -> Result<()> {
        let mut all = self.read()?;
        all.extend_from_slice(new_changes);
        self.write(&all)
    }

    /// Replace the log with the given history (truncate + write).
    pub fn write(&self, changes: &[Change]) -> Result<()> {
        let path = self.log_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, encode_changes(changes))?;
        debug!("Wrote {} changes to {}", changes.len(), path.display());
        Ok(())
    }
}

/// Read the change log of a sync root. Convenience wrapper.
pub fn read_changelog(root: &Path) -> Result<Vec<Change>> {
    ChangeLogStore::new(root).read()
}

/// Rewrite the change log of a sync root.
pub fn write_changelog(root: &Path, changes: &[Change]) -> Result<()> {
    ChangeLogStore::new(root).write(changes)
}

/// Reconstruct the historical tree snapshot a change log describes.
///
/// Creations and modifications insert, deletions remove. This is the
/// canonical way to obtain the "previous" tree for diffing.
pub fn build_tree_from_changes(changes: &[Change]) -> DirNode {
    let mut root = DirNode::new_root();
    for change in changes {
        let tokens = split_path(&change.file.path);
        match change.kind {
            ChangeKind::Creation | ChangeKind::Modification => {
                let metadata =
                    MetadataNode::new(change.file.name(), change.file.kind, change.earliest);
                if change.file.is_dir() {
                    root.insert_dir(&tokens, metadata);
                } else {
                    root.insert_file(&tokens, metadata);
                }
            }
            ChangeKind::Deletion => {
                if !root.remove(&tokens) {
                    warn!("Failed to delete {} from file tree", change.file.path);
                }
            }
            other => {
                warn!("Cannot apply {} for {}", other, change.file.path);
            }
        }
    }
    root
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::{File, FileKind};
    use tempfile::tempdir;

    fn creation(path: &str, mtime: i64, kind: FileKind) -> Change {
        Change {
            kind: ChangeKind::Creation,
            earliest: mtime,
            latest: 0,
            file: File::new(path, kind),
        }
    }

    fn deletion(path: &str, mtime: i64, kind: FileKind) -> Change {
        Change {
            kind: ChangeKind::Deletion,
            earliest: mtime,
            latest: mtime + 10,
            file: File::new(path, kind),
        }
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let changes = vec![
            creation("d", 100, FileKind::Directory),
            creation("d/f", 150, FileKind::File),
            deletion("d/f", 150, FileKind::File),
        ];
        let encoded = encode_changes(&changes);
        assert_eq!(decode_changes(&encoded), changes);
    }

    #[test]
    fn test_decode_stops_at_terminator() {
        let mut encoded = encode_changes(&[creation("a", 1, FileKind::File)]);
        // Records after the terminator belong to nobody and must be ignored.
        creation("ghost", 2, FileKind::File).encode_csv(&mut encoded);

        let decoded = decode_changes(&encoded);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].file.path, "a");
    }

    #[test]
    fn test_decode_skips_malformed_lines() {
        let encoded = format!(
            "not,a,record\n{}",
            encode_changes(&[creation("ok", 5, FileKind::File)])
        );
        let decoded = decode_changes(&encoded);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].file.path, "ok");
    }

    #[test]
    fn test_store_read_append_write() {
        let dir = tempdir().unwrap();
        let store = ChangeLogStore::new(dir.path());

        assert!(store.read().unwrap().is_empty());

        store.append(&[creation("a", 1, FileKind::File)]).unwrap();
        store.append(&[creation("b", 2, FileKind::File)]).unwrap();
        let all = store.read().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].file.path, "b");

        store.write(&[creation("c", 3, FileKind::File)]).unwrap();
        let rewritten = store.read().unwrap();
        assert_eq!(rewritten.len(), 1);
        assert_eq!(rewritten[0].file.path, "c");
    }

    #[test]
    fn test_build_tree_from_changes() {
        let changes = vec![
            // Deep insert before the parent's own creation record.
            creation("d/f", 150, FileKind::File),
            creation("d", 100, FileKind::Directory),
            creation("gone", 50, FileKind::File),
            deletion("gone", 50, FileKind::File),
        ];
        let tree = build_tree_from_changes(&changes);

        let d = tree.get_dir(&split_path("d")).unwrap();
        assert_eq!(d.metadata.mtime, 100);
        assert!(tree.get_file(&split_path("d/f")).is_some());
        assert!(tree.get_file(&split_path("gone")).is_none());
    }
}
