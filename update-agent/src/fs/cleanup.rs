//! Removal of partial downloads left behind by an interrupted session.

use super::paths::TEMPORARY_SUFFIX;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Delete every `*.TEMPORARY` file under `root`. Returns how many were removed.
///
/// Unreadable directories and failed deletions are logged and skipped.
pub fn remove_stale_temporaries(root: &Path) -> usize {
    let mut removed = 0;

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Skipping unreadable entry during cleanup: {}", e);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }
        if !entry.file_name().to_string_lossy().ends_with(TEMPORARY_SUFFIX) {
            continue;
        }

        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                debug!("Removed stale temporary {}", entry.path().display());
                removed += 1;
            }
            Err(e) => warn!(
                "Failed to remove stale temporary {}: {}",
                entry.path().display(),
                e
            ),
        }
    }

    removed
}
