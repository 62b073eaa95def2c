//! Two-way history merge
//!
//! Per path: a side that is alone with its history wins trivially; when both
//! sides touched the path, one history must be a prefix of the other (a
//! fast-forward, the longer side wins) or the user supplies a resolution.
//! The merge is symmetric: both peers run it locally on the same inputs and
//! must arrive at identical merged sets.

use std::collections::BTreeMap;

use tracing::{debug, error};

use fmerge_tree::Change;

use crate::change_set::SortedChangeSet;

/// How a conflicted path should be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    KeepLocal,
    KeepRemote,
}

impl ConflictResolution {
    pub fn to_wire(self) -> i32 {
        match self {
            ConflictResolution::KeepLocal => 0,
            ConflictResolution::KeepRemote => 1,
        }
    }

    pub fn from_wire(value: i32) -> Option<Self> {
        match value {
            0 => Some(ConflictResolution::KeepLocal),
            1 => Some(ConflictResolution::KeepRemote),
            _ => None,
        }
    }

    /// The same choice seen from the peer's perspective.
    pub fn swapped(self) -> Self {
        match self {
            ConflictResolution::KeepLocal => ConflictResolution::KeepRemote,
            ConflictResolution::KeepRemote => ConflictResolution::KeepLocal,
        }
    }
}

impl std::fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictResolution::KeepLocal => write!(f, "keep local"),
            ConflictResolution::KeepRemote => write!(f, "keep remote"),
        }
    }
}

/// Resolutions keyed by conflicted path.
pub type ConflictResolutionSet = BTreeMap<String, ConflictResolution>;

/// A path whose two histories diverge in a way that cannot be
/// fast-forwarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub path: String,
}

impl Conflict {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// Translate a resolution set for transmission to the peer: their local is
/// our remote and vice versa. No other information changes.
pub fn translate_peer_resolutions(local: &ConflictResolutionSet) -> ConflictResolutionSet {
    local
        .iter()
        .map(|(path, resolution)| (path.clone(), resolution.swapped()))
        .collect()
}

/// Merge two sorted change sets.
///
/// Returns the merged set and the list of unresolved conflicts. If any
/// conflict remains the merged set is empty; the caller must obtain
/// resolutions and retry.
pub fn merge_change_sets(
    local: &SortedChangeSet,
    remote: &SortedChangeSet,
    resolutions: &ConflictResolutionSet,
) -> (SortedChangeSet, Vec<Conflict>) {
    let mut merged: SortedChangeSet = BTreeMap::new();
    let mut conflicts = Vec::new();

    // Work starting from the local branch, but this process is symmetric.
    for (path, local_changes) in local {
        match remote.get(path) {
            None => {
                // Trivial merge: the other branch never touched this file.
                merged.insert(path.clone(), local_changes.clone());
            }
            Some(remote_changes) => match resolutions.get(path) {
                Some(ConflictResolution::KeepLocal) => {
                    merged.insert(path.clone(), local_changes.clone());
                }
                Some(ConflictResolution::KeepRemote) => {
                    merged.insert(path.clone(), remote_changes.clone());
                }
                None => match try_automatic_resolution(local_changes, remote_changes) {
                    Some(resolved) => {
                        merged.insert(path.clone(), resolved);
                    }
                    None => conflicts.push(Conflict::new(path.clone())),
                },
            },
        }
    }

    // The remote-only paths; conflicts were all found in the first pass.
    for (path, remote_changes) in remote {
        if !local.contains_key(path) {
            merged.insert(path.clone(), remote_changes.clone());
        }
    }

    if !conflicts.is_empty() {
        error!("Merge failed with {} unresolved conflicts", conflicts.len());
        return (BTreeMap::new(), conflicts);
    }
    debug!("Merged {} file histories", merged.len());
    (merged, conflicts)
}

/// Fast-forward resolution: if one history is a prefix of the other
/// (structural change equality), the longer one wins. Equal-length equal
/// histories resolve to the local side.
fn try_automatic_resolution(local: &[Change], remote: &[Change]) -> Option<Vec<Change>> {
    let common = local.len().min(remote.len());
    for i in 0..common {
        if !local[i].matches(&remote[i]) {
            return None;
        }
    }
    if local.len() >= remote.len() {
        Some(local.to_vec())
    } else {
        Some(remote.to_vec())
    }
}
