//! In-memory metadata tree
//!
//! A `DirNode` owns its children directly; lookups and inserts work on
//! pre-split path tokens. Inserting a node whose parent directories are
//! missing creates placeholder parents with `mtime = 0` which receive their
//! real metadata once it arrives.

use tracing::warn;

use crate::file::FileKind;

/// Per-entry metadata carried by the tree. No content, no size: the mtime
/// is the version identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataNode {
    pub name: String,
    pub mtime: i64,
    pub kind: FileKind,
}

impl MetadataNode {
    pub fn new(name: impl Into<String>, kind: FileKind, mtime: i64) -> Self {
        Self {
            name: name.into(),
            mtime,
            kind,
        }
    }
}

/// A directory node with owned children. Child names are unique within a
/// node across both the subdirectory and file lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirNode {
    pub metadata: MetadataNode,
    subdirs: Vec<DirNode>,
    files: Vec<MetadataNode>,
}

impl DirNode {
    pub fn new(metadata: MetadataNode) -> Self {
        Self {
            metadata,
            subdirs: Vec::new(),
            files: Vec::new(),
        }
    }

    /// The anonymous root of a sync tree.
    pub fn new_root() -> Self {
        Self::new(MetadataNode::new("", FileKind::Directory, 0))
    }

    pub fn subdirs(&self) -> &[DirNode] {
        &self.subdirs
    }

    pub fn files(&self) -> &[MetadataNode] {
        &self.files
    }

    /// Look up a directory by path tokens. Empty tokens name this node.
    pub fn get_dir(&self, tokens: &[String]) -> Option<&DirNode> {
        match tokens.split_first() {
            None => Some(self),
            Some((head, rest)) => self
                .subdirs
                .iter()
                .find(|d| d.metadata.name == *head)?
                .get_dir(rest),
        }
    }

    fn get_dir_mut(&mut self, tokens: &[String]) -> Option<&mut DirNode> {
        match tokens.split_first() {
            None => Some(self),
            Some((head, rest)) => self
                .subdirs
                .iter_mut()
                .find(|d| d.metadata.name == *head)?
                .get_dir_mut(rest),
        }
    }

    /// Look up a file by path tokens.
    pub fn get_file(&self, tokens: &[String]) -> Option<&MetadataNode> {
        let (name, parents) = tokens.split_last()?;
        let parent = self.get_dir(parents)?;
        parent.files.iter().find(|f| f.name == *name)
    }

    /// Walk down to the directory named by `tokens`, creating placeholder
    /// directories (`mtime = 0`) for every missing component.
    fn ensure_dir(&mut self, tokens: &[String]) -> &mut DirNode {
        match tokens.split_first() {
            None => self,
            Some((head, rest)) => {
                let idx = match self.subdirs.iter().position(|d| d.metadata.name == *head) {
                    Some(idx) => idx,
                    None => {
                        self.subdirs.push(DirNode::new(MetadataNode::new(
                            head.clone(),
                            FileKind::Directory,
                            0,
                        )));
                        self.subdirs.len() - 1
                    }
                };
                self.subdirs[idx].ensure_dir(rest)
            }
        }
    }

    /// Insert or update a directory. An existing directory at the target
    /// path has its metadata replaced (this is how placeholders are fixed).
    pub fn insert_dir(&mut self, tokens: &[String], metadata: MetadataNode) {
        let Some((name, parents)) = tokens.split_last() else {
            warn!("Refusing to insert a directory over the tree root");
            return;
        };
        let parent = self.ensure_dir(parents);
        match parent.subdirs.iter_mut().find(|d| d.metadata.name == *name) {
            Some(existing) => existing.metadata = metadata,
            None => parent.subdirs.push(DirNode::new(metadata)),
        }
    }

    /// Insert or update a file-like entry (regular file or symlink).
    pub fn insert_file(&mut self, tokens: &[String], metadata: MetadataNode) {
        let Some((name, parents)) = tokens.split_last() else {
            warn!("Refusing to insert a file with an empty path");
            return;
        };
        let parent = self.ensure_dir(parents);
        match parent.files.iter_mut().find(|f| f.name == *name) {
            Some(existing) => {
                existing.mtime = metadata.mtime;
                existing.kind = metadata.kind;
            }
            None => parent.files.push(metadata),
        }
    }

    /// Remove the entry named by `tokens`, whether file or directory.
    ///
    /// Returns true if the entry is gone afterwards; a missing parent counts
    /// as already removed.
    pub fn remove(&mut self, tokens: &[String]) -> bool {
        let Some((name, parents)) = tokens.split_last() else {
            return false;
        };
        let Some(parent) = self.get_dir_mut(parents) else {
            return true;
        };
        if let Some(idx) = parent.files.iter().position(|f| f.name == *name) {
            parent.files.remove(idx);
            return true;
        }
        if let Some(idx) = parent.subdirs.iter().position(|d| d.metadata.name == *name) {
            parent.subdirs.remove(idx);
            return true;
        }
        false
    }

    /// Depth-first visit of every node below this one. Directories are
    /// visited before their contents; `is_dir` distinguishes the two lists.
    pub fn visit<F>(&self, f: &mut F)
    where
        F: FnMut(&[String], &MetadataNode, bool),
    {
        self.visit_inner(&mut Vec::new(), f)
    }

    fn visit_inner<F>(&self, prefix: &mut Vec<String>, f: &mut F)
    where
        F: FnMut(&[String], &MetadataNode, bool),
    {
        for subdir in &self.subdirs {
            prefix.push(subdir.metadata.name.clone());
            f(prefix, &subdir.metadata, true);
            subdir.visit_inner(prefix, f);
            prefix.pop();
        }
        for file in &self.files {
            prefix.push(file.name.clone());
            f(prefix, file, false);
            prefix.pop();
        }
    }

    /// Total number of entries below this node.
    pub fn len(&self) -> usize {
        let mut count = 0;
        self.visit(&mut |_, _, _| count += 1);
        count
    }

    pub fn is_empty(&self) -> bool {
        self.subdirs.is_empty() && self.files.is_empty()
    }
}
