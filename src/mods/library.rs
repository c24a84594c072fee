//! Game and mod folders under the mods root.
//!
//! `<mods root>/<game>/<mod>/...` where each mod folder mirrors the
//! install base. A game folder also holds its status cache and presets.

use super::cache;
use super::status::ModDescriptor;
use crate::config::{PRESETS_FILE, STATUS_CACHE_FILE};
use crate::titles;

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A game folder under the mods root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameFolder {
    pub name: String,
    pub path: PathBuf,
    /// First title-id shaped folder found inside, if any
    pub title_id: Option<String>,
    pub mod_count: usize,
}

pub fn status_cache_path(game_dir: &Path) -> PathBuf {
    game_dir.join(STATUS_CACHE_FILE)
}

pub fn presets_path(game_dir: &Path) -> PathBuf {
    game_dir.join(PRESETS_FILE)
}

/// Sorted names and paths of the directories directly under `dir`.
fn sorted_subdirs(dir: &Path) -> Vec<(String, PathBuf)> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Could not list {}: {}", dir.display(), e);
            }
            return Vec::new();
        }
    };

    let mut dirs: Vec<(String, PathBuf)> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| (e.file_name().to_string_lossy().into_owned(), e.path()))
        .collect();
    dirs.sort();
    dirs
}

/// Every game folder under `mods_root`, sorted by name.
pub fn list_games(mods_root: &Path) -> Vec<GameFolder> {
    sorted_subdirs(mods_root)
        .into_iter()
        .map(|(name, path)| GameFolder {
            title_id: titles::find_title_id(&path),
            mod_count: sorted_subdirs(&path).len(),
            name,
            path,
        })
        .collect()
}

/// Mod folders of a game, sorted, all UNCHECKED.
pub fn list_mods(game_dir: &Path) -> Vec<ModDescriptor> {
    sorted_subdirs(game_dir)
        .into_iter()
        .map(|(name, path)| ModDescriptor::new(name, path))
        .collect()
}

/// Mod folders of a game with statuses from its cache.
pub fn load_mods(game_dir: &Path) -> Result<Vec<ModDescriptor>> {
    let mut mods = list_mods(game_dir);
    cache::load_statuses(&status_cache_path(game_dir), &mut mods)?;
    debug!("Loaded {} mods from {}", mods.len(), game_dir.display());
    Ok(mods)
}

/// Find a mod of a game by folder name.
pub fn find_mod(game_dir: &Path, name: &str) -> Option<ModDescriptor> {
    let path = game_dir.join(name);
    path.is_dir().then(|| ModDescriptor::new(name, path))
}
