//! Interactive conflict resolution
//!
//! Presents each conflicted path as a two-column comparison of the local
//! and remote change histories, then asks the user to keep one side. A
//! cancelled prompt means the peer resolved first; the caller retries the
//! merge with the received resolutions.

use std::sync::Arc;

use chrono::DateTime;

use fmerge_merge::{Conflict, ConflictResolution, ConflictResolutionSet, SortedChangeSet};
use fmerge_tree::Change;

use crate::ui::{PromptOutcome, UserInterface};

const COLUMN_WIDTH: usize = 36;

/// Ask the user to resolve every conflict, in alphabetical path order.
///
/// Returns `None` when a prompt is cancelled, i.e. the peer's resolutions
/// arrived while we were asking.
pub async fn ask_for_resolutions(
    ui: &Arc<dyn UserInterface>,
    conflicts: &[Conflict],
    local: &SortedChangeSet,
    remote: &SortedChangeSet,
) -> Option<ConflictResolutionSet> {
    let mut sorted: Vec<&Conflict> = conflicts.iter().collect();
    sorted.sort_by(|a, b| a.path.cmp(&b.path));

    ui.log(&"=".repeat(2 * COLUMN_WIDTH));
    ui.log(&center("RESOLVING CONFLICTS", 2 * COLUMN_WIDTH, '='));
    ui.log(&"=".repeat(2 * COLUMN_WIDTH));

    let mut resolutions = ConflictResolutionSet::new();
    for conflict in sorted {
        let path = &conflict.path;
        ui.log("");
        ui.log(&center(&format!("CONFLICT: {}", path), 2 * COLUMN_WIDTH, '='));
        for line in format_comparison(
            local.get(path).map(Vec::as_slice).unwrap_or(&[]),
            remote.get(path).map(Vec::as_slice).unwrap_or(&[]),
        ) {
            ui.log(&line);
        }

        match ui
            .prompt_choice("Keep (l)ocal or (r)emote?", &['l', 'r'])
            .await
        {
            PromptOutcome::Choice('l') => {
                resolutions.insert(path.clone(), ConflictResolution::KeepLocal);
            }
            PromptOutcome::Choice(_) => {
                resolutions.insert(path.clone(), ConflictResolution::KeepRemote);
            }
            PromptOutcome::Cancelled => return None,
        }
    }
    Some(resolutions)
}

/// Render the two histories side by side, one change per row.
pub fn format_comparison(local: &[Change], remote: &[Change]) -> Vec<String> {
    let mut lines = vec![format!(
        "{}{}",
        center("~~~ LOCAL ~~~", COLUMN_WIDTH, ' '),
        center("~~~ REMOTE ~~~", COLUMN_WIDTH, ' ')
    )];

    for i in 0..local.len().max(remote.len()) {
        let left = local.get(i).map(format_change_cell).unwrap_or_default();
        let right = remote.get(i).map(format_change_cell).unwrap_or_default();
        lines.push(format!("{:<width$}{}", left, right, width = COLUMN_WIDTH));
    }
    lines
}

fn format_change_cell(change: &Change) -> String {
    format!(
        "{:<13} {}",
        change.kind.to_string(),
        format_timestamp(change.earliest)
    )
}

fn center(contents: &str, width: usize, pad: char) -> String {
    if contents.len() + 2 >= width {
        return contents.to_string();
    }
    let total = width - contents.len() - 2;
    let left = total / 2;
    let right = total - left;
    format!(
        "{} {} {}",
        pad.to_string().repeat(left),
        contents,
        pad.to_string().repeat(right)
    )
}

/// Format a unix timestamp as `YYYY-MM-DD HH:MM:SS` (UTC).
pub fn format_timestamp(unix: i64) -> String {
    DateTime::from_timestamp(unix, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| unix.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::HeadlessUi;
    use fmerge_merge::sort_changes_by_file;
    use fmerge_tree::{ChangeKind, File, FileKind};

    fn change(kind: ChangeKind, mtime: i64, path: &str) -> Change {
        Change {
            kind,
            earliest: mtime,
            latest: 0,
            file: File::new(path, FileKind::File),
        }
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00");
        assert_eq!(format_timestamp(951_791_045), "2000-02-29 02:24:05");
        assert_eq!(format_timestamp(1_700_000_000), "2023-11-14 22:13:20");
    }

    #[test]
    fn test_format_comparison_pads_uneven_histories() {
        let local = vec![change(ChangeKind::Creation, 100, "f")];
        let remote = vec![
            change(ChangeKind::Creation, 100, "f"),
            change(ChangeKind::Modification, 200, "f"),
        ];

        let lines = format_comparison(&local, &remote);
        // Header plus one row per history entry of the longer side.
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains("Creation"));
        assert!(lines[2].contains("Modification"));
    }

    #[tokio::test]
    async fn test_ask_resolves_in_path_order() {
        let ui: Arc<dyn UserInterface> = Arc::new(HeadlessUi::scripted(['l', 'r']));
        let local = sort_changes_by_file(vec![
            change(ChangeKind::Modification, 10, "b"),
            change(ChangeKind::Modification, 10, "a"),
        ]);
        let remote = sort_changes_by_file(vec![
            change(ChangeKind::Modification, 20, "b"),
            change(ChangeKind::Modification, 20, "a"),
        ]);
        let conflicts = vec![Conflict::new("b"), Conflict::new("a")];

        let resolutions = ask_for_resolutions(&ui, &conflicts, &local, &remote)
            .await
            .unwrap();
        // "a" was asked first and answered 'l'.
        assert_eq!(resolutions["a"], ConflictResolution::KeepLocal);
        assert_eq!(resolutions["b"], ConflictResolution::KeepRemote);
    }
}
