//! Relative file listing of a mod folder.

use crate::paths;

use std::path::Path;
use tracing::warn;
use walkdir::WalkDir;

/// Every regular file under `mod_root`, relative to it, `/`-separated.
///
/// Order is whatever the filesystem yields. Empty if the root is missing.
pub fn list_files(mod_root: &Path) -> Vec<String> {
    if !mod_root.is_dir() {
        return Vec::new();
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(mod_root).min_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable path in {}: {}", mod_root.display(), e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(relative) = paths::relative_slash_path(mod_root, entry.path()) {
            files.push(relative);
        }
    }
    files
}
