//! Applying, removing and verifying mods against the install base.
//!
//! A mod is a folder whose relative file tree mirrors the install base.
//! Applying copies every file over; removing deletes only destinations
//! whose size still matches the mod's copy, so files another mod layered
//! on top survive; verifying compares every file and derives a status.
//!
//! Only one operation may run per install base at a time. A second caller
//! gets [`ReconcileError::Busy`] instead of interleaving writes.

use super::cache::{self, StatusCache};
use super::compare::FileComparator;
use super::files::list_files;
use super::library;
use super::status::{ModDescriptor, ModStatus};
use crate::archive::{self, CopyError};
use crate::paths;
use crate::progress::ProgressSink;

use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Copy buffer for applying mod files.
const APPLY_CHUNK: usize = 2 * 1024 * 1024;

/// Install bases with an operation in flight.
static BUSY_BASES: Lazy<Mutex<HashSet<PathBuf>>> = Lazy::new(|| Mutex::new(HashSet::new()));

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("Another mod operation is already running on {0}")]
    Busy(PathBuf),

    #[error("Mod folder not found: {0}")]
    ModNotFound(PathBuf),

    #[error("Status cache error: {0:#}")]
    Cache(anyhow::Error),
}

/// Held while an operation owns an install base.
#[derive(Debug)]
pub struct OperationGuard {
    key: PathBuf,
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        let mut busy = BUSY_BASES.lock().unwrap_or_else(|e| e.into_inner());
        busy.remove(&self.key);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub copied: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveReport {
    pub removed: usize,
    /// Destination differs from this mod's copy, left in place
    pub kept: usize,
    pub missing: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub mods: usize,
    pub files: usize,
}

pub struct ModStateReconciler {
    install_base: PathBuf,
    comparator: FileComparator,
    progress: Arc<ProgressSink>,
}

impl ModStateReconciler {
    pub fn new(install_base: impl Into<PathBuf>, progress: Arc<ProgressSink>) -> Self {
        Self {
            install_base: install_base.into(),
            comparator: FileComparator::default(),
            progress,
        }
    }

    pub fn with_comparator(mut self, comparator: FileComparator) -> Self {
        self.comparator = comparator;
        self
    }

    pub fn install_base(&self) -> &Path {
        &self.install_base
    }

    pub(crate) fn progress(&self) -> &ProgressSink {
        &self.progress
    }

    /// Claim the install base for one operation.
    pub fn lock(&self) -> Result<OperationGuard, ReconcileError> {
        let key = fs::canonicalize(&self.install_base).unwrap_or_else(|_| self.install_base.clone());
        let mut busy = BUSY_BASES.lock().unwrap_or_else(|e| e.into_inner());
        if !busy.insert(key.clone()) {
            return Err(ReconcileError::Busy(self.install_base.clone()));
        }
        Ok(OperationGuard { key })
    }

    /// Copy every file of the mod into the install base.
    pub fn apply(&self, m: &ModDescriptor) -> Result<ApplyReport, ReconcileError> {
        let _guard = self.lock()?;
        if !m.path.is_dir() {
            return Err(ReconcileError::ModNotFound(m.path.clone()));
        }
        let files = list_files(&m.path);
        self.begin(files.len());
        Ok(self.apply_files(&m.path, &files))
    }

    /// Delete the mod's files from the install base where they still match.
    pub fn remove(&self, m: &ModDescriptor) -> Result<RemoveReport, ReconcileError> {
        let _guard = self.lock()?;
        if !m.path.is_dir() {
            return Err(ReconcileError::ModNotFound(m.path.clone()));
        }
        let files = list_files(&m.path);
        self.begin(files.len());
        Ok(self.remove_files(&m.path, &files))
    }

    /// Compare every file of the mod against the install base.
    pub fn verify(&self, m: &ModDescriptor) -> Result<(ModStatus, f64), ReconcileError> {
        let _guard = self.lock()?;
        let files = list_files(&m.path);
        self.begin(files.len());
        Ok(self.verify_files(&m.path, &files))
    }

    /// Re-verify every mod of a game and rewrite its status cache.
    pub fn recheck_all(&self, game_dir: &Path) -> Result<Vec<ModDescriptor>, ReconcileError> {
        let _guard = self.lock()?;
        let mut mods = library::list_mods(game_dir);
        let listed: Vec<Vec<String>> = mods.iter().map(|m| list_files(&m.path)).collect();
        self.begin(listed.iter().map(Vec::len).sum());

        for (m, files) in mods.iter_mut().zip(&listed) {
            let (status, fraction) = self.verify_files(&m.path, files);
            debug!("{}: {} ({:.2})", m.name, status, fraction);
            m.set_status(status, fraction);
        }

        StatusCache::save(&library::status_cache_path(game_dir), &mods).map_err(ReconcileError::Cache)?;
        info!("Rechecked {} mods in {}", mods.len(), game_dir.display());
        Ok(mods)
    }

    /// Remove every mod of a game, then drop its status cache.
    pub fn remove_all(&self, game_dir: &Path) -> Result<BatchReport, ReconcileError> {
        let _guard = self.lock()?;
        let mods = library::list_mods(game_dir);
        let listed: Vec<Vec<String>> = mods.iter().map(|m| list_files(&m.path)).collect();
        let total: usize = listed.iter().map(Vec::len).sum();
        self.begin(total);

        for (m, files) in mods.iter().zip(&listed) {
            let report = self.remove_files(&m.path, files);
            debug!(
                "{}: removed {}, kept {}, missing {}",
                m.name, report.removed, report.kept, report.missing
            );
        }

        cache::clear(&library::status_cache_path(game_dir));
        info!("Removed {} mods from {}", mods.len(), self.install_base.display());
        Ok(BatchReport {
            mods: mods.len(),
            files: total,
        })
    }

    pub(crate) fn begin(&self, total_files: usize) {
        self.progress.set_total_steps(total_files as u64);
        self.progress.set_step(0);
    }

    pub(crate) fn apply_files(&self, mod_dir: &Path, files: &[String]) -> ApplyReport {
        let mut report = ApplyReport::default();
        for rel in files {
            let src = mod_dir.join(rel);
            let dst = self.install_base.join(rel);
            match copy_file(&src, &dst) {
                Ok(_) => report.copied += 1,
                Err(e) => {
                    warn!("Failed to copy {} -> {}: {}", src.display(), dst.display(), e);
                    report.failed += 1;
                }
            }
            self.progress.increment_step(1);
        }
        debug!("Applied {}: {} copied, {} failed", mod_dir.display(), report.copied, report.failed);
        report
    }

    pub(crate) fn remove_files(&self, mod_dir: &Path, files: &[String]) -> RemoveReport {
        let mut report = RemoveReport::default();
        for rel in files {
            let src = mod_dir.join(rel);
            let dst = self.install_base.join(rel);
            self.progress.increment_step(1);

            let Ok(dst_meta) = dst.metadata() else {
                report.missing += 1;
                continue;
            };
            let src_len = src.metadata().map(|m| m.len()).ok();
            if src_len != Some(dst_meta.len()) {
                debug!("Keeping {} (size differs from {})", dst.display(), src.display());
                report.kept += 1;
                continue;
            }

            match fs::remove_file(&dst) {
                Ok(()) => {
                    report.removed += 1;
                    self.prune_empty_parents(&dst);
                }
                Err(e) => {
                    warn!("Failed to remove {}: {}", dst.display(), e);
                    report.failed += 1;
                }
            }
        }
        report
    }

    pub(crate) fn verify_files(&self, mod_dir: &Path, files: &[String]) -> (ModStatus, f64) {
        if files.is_empty() {
            return (ModStatus::NoFile, 0.0);
        }

        let mut matched = 0;
        for rel in files {
            if self.comparator.equal(&mod_dir.join(rel), &self.install_base.join(rel)) {
                matched += 1;
            }
            self.progress.increment_step(1);
        }

        let fraction = matched as f64 / files.len() as f64;
        (ModStatus::from_counts(matched, files.len()), fraction)
    }

    /// Remove now-empty directories above `removed`, stopping below the install base.
    fn prune_empty_parents(&self, removed: &Path) {
        let mut dir = removed.parent();
        while let Some(current) = dir {
            if current == self.install_base || !current.starts_with(&self.install_base) {
                break;
            }
            // Fails on non-empty directories, which ends the walk
            if fs::remove_dir(current).is_err() {
                break;
            }
            dir = current.parent();
        }
    }
}

fn copy_file(src: &Path, dst: &Path) -> Result<u64, CopyError> {
    let reader = File::open(src).map_err(CopyError::Read)?;
    paths::ensure_parent_dirs(dst).map_err(CopyError::Write)?;
    let writer = File::create(dst).map_err(CopyError::Write)?;
    let mut reader = BufReader::with_capacity(APPLY_CHUNK, reader);
    let mut writer = BufWriter::with_capacity(APPLY_CHUNK, writer);
    archive::copy_chunked(&mut reader, &mut writer, APPLY_CHUNK)
}
