//! The change model: one record per observed file event
//!
//! A change log is an ordered sequence of these records, persisted as
//! line-oriented CSV. Within one file's history the records are causally
//! ordered; the last record decides the file's effective state.

use crate::errors::{Result, TreeError};
use crate::file::{File, FileKind};

/// Kind of change, with the on-disk/on-wire values fixed by the format.
///
/// Value 4 is reserved by the format and decodes to `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ChangeKind {
    Unknown = 0,
    Modification = 1,
    Creation = 2,
    Deletion = 3,
    TerminateList = 5,
}

impl ChangeKind {
    pub fn from_wire(value: u8) -> Self {
        match value {
            1 => ChangeKind::Modification,
            2 => ChangeKind::Creation,
            3 => ChangeKind::Deletion,
            5 => ChangeKind::TerminateList,
            _ => ChangeKind::Unknown,
        }
    }

    pub fn to_wire(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ChangeKind::Unknown => "Unknown",
            ChangeKind::Modification => "Modification",
            ChangeKind::Creation => "Creation",
            ChangeKind::Deletion => "Deletion",
            ChangeKind::TerminateList => "TerminateList",
        };
        write!(f, "{}", name)
    }
}

/// One record in a file's history.
///
/// `earliest` is the moment the change became true: the new mtime for
/// creations and modifications, the last observed mtime for deletions.
/// `latest` is only set when the true moment lies within a range, e.g. a
/// deletion observed at scan time; otherwise it is 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub kind: ChangeKind,
    pub earliest: i64,
    pub latest: i64,
    pub file: File,
}

impl Change {
    /// The end-of-stream marker written after every serialized change list.
    pub fn terminator() -> Self {
        Self {
            kind: ChangeKind::TerminateList,
            earliest: 0,
            latest: 0,
            file: File::new("", FileKind::Unknown),
        }
    }

    /// Structural equality as used by history comparison: directory changes
    /// ignore the time fields because directory mtimes are noisy.
    pub fn matches(&self, other: &Change) -> bool {
        if self.kind != other.kind
            || self.file.kind != other.file.kind
            || self.file.path != other.file.path
        {
            return false;
        }
        if self.file.is_dir() {
            return true;
        }
        self.earliest == other.earliest && self.latest == other.latest
    }

    /// Encode as one CSV record: `<kind>,<earliest>,<latest>,<ftype>,<path>\n`.
    pub fn encode_csv(&self, out: &mut String) {
        out.push_str(&format!(
            "{},{},{},{},{}\n",
            self.kind.to_wire(),
            self.earliest,
            self.latest,
            self.file.kind.to_wire(),
            self.file.path
        ));
    }

    /// Decode one CSV record (without the trailing newline). The path field
    /// is everything after the fourth comma, so paths may contain commas.
    pub fn decode_csv(line: &str) -> Result<Change> {
        let mut fields = line.splitn(5, ',');
        let mut next = || {
            fields
                .next()
                .ok_or_else(|| TreeError::MalformedRecord(line.to_string()))
        };

        let kind: u8 = parse_field(next()?, line)?;
        let earliest: i64 = parse_field(next()?, line)?;
        let latest: i64 = parse_field(next()?, line)?;
        let file_kind: u8 = parse_field(next()?, line)?;
        let path = next()?.to_string();

        Ok(Change {
            kind: ChangeKind::from_wire(kind),
            earliest,
            latest,
            file: File::new(path, FileKind::from_wire(file_kind)),
        })
    }
}

fn parse_field<T: std::str::FromStr>(field: &str, line: &str) -> Result<T> {
    field
        .parse()
        .map_err(|_| TreeError::MalformedRecord(line.to_string()))
}

impl std::fmt::Display for Change {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:<14} {} {}", self.kind, self.file.kind, self.file.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(kind: ChangeKind, earliest: i64, latest: i64, path: &str, fk: FileKind) -> Change {
        Change {
            kind,
            earliest,
            latest,
            file: File::new(path, fk),
        }
    }

    #[test]
    fn test_csv_roundtrip() {
        let original = change(ChangeKind::Deletion, 400, 950, "docs/old.txt", FileKind::File);
        let mut encoded = String::new();
        original.encode_csv(&mut encoded);
        assert_eq!(encoded, "3,400,950,2,docs/old.txt\n");

        let decoded = Change::decode_csv(encoded.trim_end()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_csv_path_with_comma() {
        let original = change(ChangeKind::Creation, 1, 0, "a,b/c,d", FileKind::File);
        let mut encoded = String::new();
        original.encode_csv(&mut encoded);

        let decoded = Change::decode_csv(encoded.trim_end()).unwrap();
        assert_eq!(decoded.file.path, "a,b/c,d");
    }

    #[test]
    fn test_csv_malformed() {
        assert!(Change::decode_csv("").is_err());
        assert!(Change::decode_csv("1,2,3").is_err());
        assert!(Change::decode_csv("x,2,3,4,path").is_err());
    }

    #[test]
    fn test_matches_ignores_directory_times() {
        let a = change(ChangeKind::Creation, 100, 0, "d", FileKind::Directory);
        let b = change(ChangeKind::Creation, 999, 5, "d", FileKind::Directory);
        assert!(a.matches(&b));

        let c = change(ChangeKind::Creation, 100, 0, "f", FileKind::File);
        let d = change(ChangeKind::Creation, 999, 0, "f", FileKind::File);
        assert!(!c.matches(&d));
        assert!(c.matches(&c.clone()));
    }

    #[test]
    fn test_matches_requires_same_kind_and_path() {
        let a = change(ChangeKind::Creation, 100, 0, "f", FileKind::File);
        let b = change(ChangeKind::Modification, 100, 0, "f", FileKind::File);
        let c = change(ChangeKind::Creation, 100, 0, "g", FileKind::File);
        assert!(!a.matches(&b));
        assert!(!a.matches(&c));
    }
}
