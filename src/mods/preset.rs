//! Mod presets: named, ordered mod lists stored per game.
//!
//! `mod_presets.conf` holds one block per preset:
//!
//! ```text
//! ########################################
//! # mods preset name
//! preset = Night
//!
//! # mods list
//! mod0 = Base Textures
//! mod1 = Dark HUD
//! ########################################
//! ```
//!
//! Mod names may repeat; order is the application order.

use super::cache::StatusCache;
use super::files::list_files;
use super::library;
use super::reconciler::{ModStateReconciler, ReconcileError};
use super::status::{ModDescriptor, ModStatus};

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const HEADER: &str = "# This is a config file\n\n\n";
const SEPARATOR: &str = "########################################";

/// Folders directly under a game that are never mods.
const NOT_MODS: &[&str] = &["exefs", "romfs"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preset {
    pub name: String,
    pub mods: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum PresetError {
    #[error("No preset at index {index} ({len} presets)")]
    InvalidIndex { index: usize, len: usize },

    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

/// A classified preset file line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PresetLine<'a> {
    Skip,
    Name(&'a str),
    Mod(&'a str),
}

fn classify(line: &str) -> PresetLine<'_> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return PresetLine::Skip;
    }
    let Some((key, value)) = line.split_once('=') else {
        return PresetLine::Skip;
    };
    let (key, value) = (key.trim(), value.trim());
    if key == "preset" {
        PresetLine::Name(value)
    } else if key.starts_with("mod") {
        PresetLine::Mod(value)
    } else {
        PresetLine::Skip
    }
}

/// The presets of one game, backed by its config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetStore {
    path: PathBuf,
    presets: Vec<Preset>,
}

impl PresetStore {
    /// Load the presets of a game folder. A missing file means no presets.
    pub fn load(game_dir: &Path) -> Result<Self> {
        let path = library::presets_path(game_dir);
        let presets = match std::fs::read_to_string(&path) {
            Ok(text) => Self::parse(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No preset file at {}", path.display());
                Vec::new()
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to read presets {}", path.display())),
        };
        Ok(Self { path, presets })
    }

    pub fn parse(text: &str) -> Vec<Preset> {
        let mut presets = Vec::new();
        let mut current: Option<Preset> = None;

        for line in text.lines() {
            match classify(line) {
                PresetLine::Name(name) => {
                    presets.extend(current.take().filter(|p| !p.name.is_empty()));
                    current = Some(Preset {
                        name: name.to_string(),
                        mods: Vec::new(),
                    });
                }
                // Mod lines before the first preset line are dropped
                PresetLine::Mod(name) => {
                    if let Some(preset) = current.as_mut() {
                        preset.mods.push(name.to_string());
                    }
                }
                PresetLine::Skip => {}
            }
        }
        presets.extend(current.filter(|p| !p.name.is_empty()));
        presets
    }

    pub fn render(presets: &[Preset]) -> String {
        let mut out = String::from(HEADER);
        for preset in presets {
            out.push_str(SEPARATOR);
            out.push_str("\n# mods preset name\n");
            out.push_str(&format!("preset = {}\n\n", preset.name));
            out.push_str("# mods list\n");
            for (i, name) in preset.mods.iter().enumerate() {
                out.push_str(&format!("mod{} = {}\n", i, name));
            }
            out.push_str(SEPARATOR);
            out.push_str("\n\n");
        }
        out
    }

    pub fn save(&self) -> Result<()> {
        let dir = self
            .path
            .parent()
            .with_context(|| format!("Preset file has no parent directory: {}", self.path.display()))?;
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

        let mut file = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
        file.write_all(Self::render(&self.presets).as_bytes())
            .context("Failed to write presets")?;
        file.persist(&self.path)
            .with_context(|| format!("Failed to write presets {}", self.path.display()))?;
        info!("Saved {} presets to {}", self.presets.len(), self.path.display());
        Ok(())
    }

    pub fn presets(&self) -> &[Preset] {
        &self.presets
    }

    pub fn find(&self, name: &str) -> Option<&Preset> {
        self.presets.iter().find(|p| p.name == name)
    }

    /// First unused `preset-N` name, N starting at 1.
    fn generate_name(&self) -> String {
        (1..)
            .map(|n| format!("preset-{}", n))
            .find(|name| self.find(name).is_none())
            .unwrap_or_default()
    }

    /// Add a preset and save. An empty name gets a generated one.
    pub fn create(&mut self, name: &str, mods: Vec<String>) -> Result<&Preset> {
        let name = match name.trim() {
            "" => self.generate_name(),
            trimmed => trimmed.to_string(),
        };
        self.presets.push(Preset { name, mods });
        self.save()?;
        let index = self.presets.len() - 1;
        Ok(&self.presets[index])
    }

    pub fn edit(&mut self, index: usize, name: &str, mods: Vec<String>) -> Result<(), PresetError> {
        let len = self.presets.len();
        let preset = self
            .presets
            .get_mut(index)
            .ok_or(PresetError::InvalidIndex { index, len })?;
        preset.name = name.trim().to_string();
        preset.mods = mods;
        self.save()?;
        Ok(())
    }

    pub fn delete_at(&mut self, index: usize) -> Result<Preset, PresetError> {
        if index >= self.presets.len() {
            return Err(PresetError::InvalidIndex {
                index,
                len: self.presets.len(),
            });
        }
        let removed = self.presets.remove(index);
        self.save()?;
        Ok(removed)
    }

    /// Delete the first preset called `name`. Returns whether one was found.
    pub fn delete_named(&mut self, name: &str) -> Result<bool> {
        let Some(index) = self.presets.iter().position(|p| p.name == name) else {
            return Ok(false);
        };
        self.presets.remove(index);
        self.save()?;
        Ok(true)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresetReport {
    pub removed_mods: usize,
    pub applied_mods: usize,
    /// Preset entries with no matching mod folder
    pub missing_mods: Vec<String>,
    pub files_copied: usize,
    pub files_failed: usize,
}

impl ModStateReconciler {
    /// Replace whatever is applied for a game with `preset`.
    ///
    /// Every mod the cache records as active or partial is removed first,
    /// then the preset's mods are applied in order, then the cache is
    /// rewritten with the preset's mods ACTIVE and all others INACTIVE.
    pub fn apply_preset(&self, game_dir: &Path, preset: &Preset) -> Result<PresetReport, ReconcileError> {
        let _guard = self.lock()?;
        let cache_path = library::status_cache_path(game_dir);
        let cache = StatusCache::load(&cache_path)
            .map_err(ReconcileError::Cache)?
            .unwrap_or_default();

        let to_remove: Vec<ModDescriptor> = cache
            .active_mods()
            .into_iter()
            .filter_map(|name| {
                let found = library::find_mod(game_dir, &name);
                if found.is_none() {
                    debug!("Cached active mod {} no longer exists", name);
                }
                found
            })
            .collect();

        let mut report = PresetReport::default();
        let mut to_apply = Vec::new();
        for name in &preset.mods {
            match library::find_mod(game_dir, name) {
                Some(m) => to_apply.push(m),
                None => {
                    warn!("Preset {} lists missing mod {}", preset.name, name);
                    report.missing_mods.push(name.clone());
                }
            }
        }

        let removal_files: Vec<Vec<String>> = to_remove.iter().map(|m| list_files(&m.path)).collect();
        let apply_files: Vec<Vec<String>> = to_apply.iter().map(|m| list_files(&m.path)).collect();
        self.begin(
            removal_files.iter().chain(&apply_files).map(Vec::len).sum(),
        );

        info!("Preset {}: removing {} active mods", preset.name, to_remove.len());
        for (m, files) in to_remove.iter().zip(&removal_files) {
            let removed = self.remove_files(&m.path, files);
            debug!("{}: removed {}, kept {}", m.name, removed.removed, removed.kept);
            report.removed_mods += 1;
        }

        info!("Preset {}: applying {} mods", preset.name, to_apply.len());
        for (m, files) in to_apply.iter().zip(&apply_files) {
            let applied = self.apply_files(&m.path, files);
            report.files_copied += applied.copied;
            report.files_failed += applied.failed;
            report.applied_mods += 1;
        }

        let in_preset: HashSet<&str> = preset.mods.iter().map(String::as_str).collect();
        let mut mods: Vec<ModDescriptor> = library::list_mods(game_dir)
            .into_iter()
            .filter(|m| !NOT_MODS.contains(&m.name.as_str()))
            .collect();
        for m in mods.iter_mut() {
            if in_preset.contains(m.name.as_str()) {
                m.set_status(ModStatus::Active, 1.0);
            } else {
                m.set_status(ModStatus::Inactive, 0.0);
            }
        }
        StatusCache::save(&cache_path, &mods).map_err(ReconcileError::Cache)?;
        self.progress().finish_steps();

        info!(
            "Preset {} applied: {} mods, {} files copied, {} failed",
            preset.name, report.applied_mods, report.files_copied, report.files_failed
        );
        Ok(report)
    }
}
