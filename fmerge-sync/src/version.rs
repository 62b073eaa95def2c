//! Version negotiation
//!
//! Version strings are either `MAJOR.MINOR~` (release builds) or
//! `dev~<hash>` (development builds). Releases are compatible when the
//! major versions match; a minor difference only warrants a warning.
//! Development builds must match exactly. Everything else is a mismatch the
//! user has to wave through.

/// Outcome of comparing the local version against the peer's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionCheck {
    /// Fully compatible.
    Match,
    /// Same major release, different minor. Proceed with a warning.
    MinorMismatch { local: u32, remote: u32 },
    /// Not compatible without the user's consent.
    Mismatch { reason: String },
}

fn parse_release(version: &str) -> Option<(u32, u32)> {
    let body = version.strip_suffix('~')?;
    let (major, minor) = body.split_once('.')?;
    Some((major.parse().ok()?, minor.parse().ok()?))
}

fn parse_dev_hash(version: &str) -> Option<&str> {
    let hash = version.strip_prefix("dev~")?;
    if hash.is_empty() {
        return None;
    }
    Some(hash)
}

/// Compare two version strings per the negotiation rules.
pub fn check_peer_version(local: &str, remote: &str) -> VersionCheck {
    let local_dev = local.starts_with("dev");
    let remote_dev = remote.starts_with("dev");

    if local_dev != remote_dev {
        return VersionCheck::Mismatch {
            reason: format!(
                "mixed development and release builds (local {}, peer {})",
                local, remote
            ),
        };
    }

    if local_dev {
        return match (parse_dev_hash(local), parse_dev_hash(remote)) {
            (Some(ours), Some(theirs)) if ours == theirs => VersionCheck::Match,
            (Some(_), Some(_)) => VersionCheck::Mismatch {
                reason: format!("development build hashes differ ({} vs {})", local, remote),
            },
            (None, _) => VersionCheck::Mismatch {
                reason: format!("malformed local version {}", local),
            },
            (_, None) => VersionCheck::Mismatch {
                reason: format!("malformed peer version {}", remote),
            },
        };
    }

    match (parse_release(local), parse_release(remote)) {
        (Some((lmaj, lmin)), Some((rmaj, rmin))) => {
            if lmaj != rmaj {
                VersionCheck::Mismatch {
                    reason: format!("major versions differ ({} vs {})", local, remote),
                }
            } else if lmin != rmin {
                VersionCheck::MinorMismatch {
                    local: lmin,
                    remote: rmin,
                }
            } else {
                VersionCheck::Match
            }
        }
        (None, _) => VersionCheck::Mismatch {
            reason: format!("malformed local version {}", local),
        },
        (_, None) => VersionCheck::Mismatch {
            reason: format!("malformed peer version {}", remote),
        },
    }
}
