//! File identity and metadata types
//!
//! Paths are always relative to the sync root, forward-slash-joined and
//! never start with `/`. The modification time is the sole version identity
//! of a file: two revisions are considered equal iff their mtimes match.

/// Kind of filesystem entry, with the wire values fixed by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FileKind {
    Unknown = 0,
    Directory = 1,
    File = 2,
    Link = 3,
}

impl FileKind {
    /// Decode a wire value. Anything out of range maps to `Unknown`.
    pub fn from_wire(value: u8) -> Self {
        match value {
            1 => FileKind::Directory,
            2 => FileKind::File,
            3 => FileKind::Link,
            _ => FileKind::Unknown,
        }
    }

    pub fn to_wire(self) -> u8 {
        self as u8
    }

    pub fn is_dir(self) -> bool {
        self == FileKind::Directory
    }

    pub fn is_file(self) -> bool {
        self == FileKind::File
    }

    pub fn is_link(self) -> bool {
        self == FileKind::Link
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FileKind::Unknown => "unknown",
            FileKind::Directory => "directory",
            FileKind::File => "file",
            FileKind::Link => "link",
        };
        write!(f, "{}", name)
    }
}

/// A path within the sync tree together with the kind it had at the moment
/// of observation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct File {
    pub path: String,
    pub kind: FileKind,
}

impl File {
    pub fn new(path: impl Into<String>, kind: FileKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    /// The final path component.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or("")
    }

    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }
}

/// Metadata snapshot of a single filesystem entry, as read with `lstat`.
///
/// Times are unix seconds. `size` is the byte length for regular files and
/// the target length for symlinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStats {
    pub mtime: i64,
    pub ctime: i64,
    pub atime: i64,
    pub size: u64,
    pub kind: FileKind,
}

/// Split a relative path into its components, dropping empty segments.
pub fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

/// Join two relative path fragments with a single separator.
pub fn join_path(base: &str, rest: &str) -> String {
    if base.is_empty() {
        rest.to_string()
    } else if base.ends_with('/') {
        format!("{}{}", base, rest)
    } else {
        format!("{}/{}", base, rest)
    }
}
