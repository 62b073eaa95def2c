//! Disk scanner
//!
//! Builds the current metadata tree with `lstat` semantics: symlinks are
//! recorded as links and never followed. The `.fmerge/` state directory at
//! the root is unconditionally ignored. Running out of file descriptors is
//! fatal; every other per-entry error is logged and the entry skipped.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

use crate::changelog::STATE_DIR;
use crate::errors::{Result, TreeError};
use crate::file::{join_path, split_path, FileKind, FileStats};
use crate::tree::{DirNode, MetadataNode};

/// Current unix time in seconds.
pub fn timestamp_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// `lstat` a path into a [`FileStats`]. Returns `None` if the entry does
/// not exist or cannot be inspected.
pub fn file_stats(path: &Path) -> Option<FileStats> {
    let metadata = fs::symlink_metadata(path).ok()?;
    let file_type = metadata.file_type();

    let kind = if file_type.is_dir() {
        FileKind::Directory
    } else if file_type.is_file() {
        FileKind::File
    } else if file_type.is_symlink() {
        FileKind::Link
    } else {
        FileKind::Unknown
    };

    Some(FileStats {
        mtime: metadata.mtime(),
        ctime: metadata.ctime(),
        atime: metadata.atime(),
        size: metadata.len(),
        kind,
    })
}

/// Build the metadata tree of everything under `root`.
pub fn scan_tree(root: &Path) -> Result<DirNode> {
    let root_stats = file_stats(root).ok_or_else(|| TreeError::NotADirectory {
        path: root.to_path_buf(),
    })?;
    if !root_stats.kind.is_dir() {
        return Err(TreeError::NotADirectory {
            path: root.to_path_buf(),
        });
    }

    let mut tree = DirNode::new_root();
    scan_dir(root, "", &mut tree)?;
    Ok(tree)
}

fn scan_dir(dir: &Path, prefix: &str, tree: &mut DirNode) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            if is_fd_exhaustion(&err) {
                return Err(TreeError::FileDescriptorsExhausted {
                    path: dir.to_path_buf(),
                    source: err,
                });
            }
            warn!("Skipping unreadable directory {}: {}", dir.display(), err);
            return Ok(());
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("Skipping unreadable entry in {}: {}", dir.display(), err);
                continue;
            }
        };
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(raw) => {
                warn!("Skipping non-UTF-8 file name {:?} in {}", raw, dir.display());
                continue;
            }
        };
        if prefix.is_empty() && name == STATE_DIR {
            continue;
        }

        let abs = entry.path();
        let relative = join_path(prefix, &name);
        let Some(stats) = file_stats(&abs) else {
            warn!("Skipping unstatable entry {}", abs.display());
            continue;
        };

        let tokens = split_path(&relative);
        match stats.kind {
            FileKind::Directory => {
                tree.insert_dir(&tokens, MetadataNode::new(&name, stats.kind, stats.mtime));
                scan_dir(&abs, &relative, tree)?;
            }
            FileKind::File | FileKind::Link => {
                tree.insert_file(&tokens, MetadataNode::new(&name, stats.kind, stats.mtime));
            }
            FileKind::Unknown => {
                warn!("{}: unknown file type, skipping", relative);
            }
        }
    }
    Ok(())
}

fn is_fd_exhaustion(err: &std::io::Error) -> bool {
    matches!(err.raw_os_error(), Some(code) if code == libc::ENFILE || code == libc::EMFILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::tempdir;

    #[test]
    fn test_scan_basic_tree() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/file.txt"), b"hello").unwrap();
        fs::write(dir.path().join("top.txt"), b"top").unwrap();

        let tree = scan_tree(dir.path()).unwrap();
        assert!(tree.get_dir(&split_path("sub")).is_some());
        assert!(tree.get_file(&split_path("sub/file.txt")).is_some());
        assert!(tree.get_file(&split_path("top.txt")).is_some());
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn test_scan_ignores_state_dir() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join(STATE_DIR)).unwrap();
        fs::write(dir.path().join(STATE_DIR).join("filechanges.db"), b"").unwrap();
        // A nested directory that merely shares the name is not ignored.
        fs::create_dir_all(dir.path().join("nested").join(STATE_DIR)).unwrap();

        let tree = scan_tree(dir.path()).unwrap();
        assert!(tree.get_dir(&split_path(STATE_DIR)).is_none());
        assert!(tree
            .get_dir(&split_path(&format!("nested/{}", STATE_DIR)))
            .is_some());
    }

    #[test]
    fn test_scan_records_symlink_without_following() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("target"), b"data").unwrap();
        symlink("target", dir.path().join("link")).unwrap();

        let tree = scan_tree(dir.path()).unwrap();
        let link = tree.get_file(&split_path("link")).unwrap();
        assert_eq!(link.kind, FileKind::Link);
    }

    #[test]
    fn test_file_stats_missing() {
        let dir = tempdir().unwrap();
        assert!(file_stats(&dir.path().join("nope")).is_none());
    }

    #[test]
    fn test_scan_rejects_file_root() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("plain");
        fs::write(&file, b"x").unwrap();
        assert!(scan_tree(&file).is_err());
    }
}
