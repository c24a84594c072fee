//! Archive extraction onto the SD card.
//!
//! Two placement modes share one streaming engine:
//!
//! - **Package mode** ([`ArchiveExtractor::extract`]) writes entries at
//!   their archive paths under an output directory. It honours the
//!   preserve list, can skip `.ini` files, renames boot-critical files
//!   the running system holds open, and remembers a bootloader payload
//!   if the archive ships one.
//! - **Title-mod mode** ([`ArchiveExtractor::extract_title_mod`]) routes
//!   romfs/exefs content into `contents/<title-id>/`.
//!
//! Both modes refuse archives that don't fit on the target volume, poll
//! the shared [`ProgressSink`] for cancellation before each entry, and
//! delete the source archive once they are past the space check.

pub mod cheats;
pub mod copy_list;
pub mod preserve;
pub mod space;
mod title_mods;

pub use cheats::{CheatRequest, CheatSetExtractor};
pub use preserve::PreserveRules;
pub use space::{FixedSpace, SpaceSource, SystemSpace};
pub use title_mods::TitleModTarget;

use crate::archive::{self, ArchiveEntry, ArchiveReader, CopyError, EntryFlow};
use crate::config::Layout;
use crate::paths::{self, CfwVariant};
use crate::progress::ProgressSink;

use copy_list::CopyListReport;
use std::fs::File;
use std::io::{BufWriter, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Write buffer size for extracted files.
pub const WRITE_CHUNK: usize = 64 * 1024;

/// UI-facing counters are refreshed every this many entries.
const PROGRESS_BATCH: usize = 10;

/// Suffix for files the running system keeps open.
pub const PROTECTED_SUFFIX: &str = ".sb";

/// Files that are replaced under [`PROTECTED_SUFFIX`] and swapped in on reboot.
const PROTECTED_FILES: &[&str] = &[
    "atmosphere/fusee-secondary.bin",
    "sept/payload.bin",
    "atmosphere/stratosphere.romfs",
    "atmosphere/package3",
    "payload.bin",
];

/// Basename prefix of the hekate bootloader payload.
const PAYLOAD_PREFIX: &str = "hekate_ctcaer";

/// What to do when a single entry can't be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryFailurePolicy {
    /// Log and move on to the next entry
    Continue,
    /// Stop, delete the archive, report failure
    Abort,
}

/// Where and how a package extraction writes
#[derive(Debug, Clone)]
pub struct ExtractionTarget {
    pub output_dir: PathBuf,
    pub cfw: CfwVariant,
    /// Leave every `.ini` entry out
    pub preserve_inis: bool,
    pub on_entry_error: EntryFailurePolicy,
}

impl ExtractionTarget {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            cfw: CfwVariant::default(),
            preserve_inis: false,
            on_entry_error: EntryFailurePolicy::Abort,
        }
    }

    pub fn with_cfw(mut self, cfw: CfwVariant) -> Self {
        self.cfw = cfw;
        self
    }

    pub fn preserve_inis(mut self, preserve: bool) -> Self {
        self.preserve_inis = preserve;
        self
    }

    pub fn on_entry_error(mut self, policy: EntryFailurePolicy) -> Self {
        self.on_entry_error = policy;
        self
    }
}

/// Counters from a finished extraction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractReport {
    /// Destination of a bootloader payload found in the archive
    pub payload: Option<PathBuf>,
    pub files_written: usize,
    pub directories: usize,
    /// Written under [`PROTECTED_SUFFIX`]
    pub renamed: usize,
    /// Left alone because of the preserve list
    pub preserved: usize,
    /// `.ini` skips, unplaceable or unsafe entries
    pub skipped: usize,
    /// Entries whose write failed (only under `EntryFailurePolicy::Continue`)
    pub failed: usize,
    /// Entries that didn't have the expected cheat database shape
    pub malformed: usize,
    pub bytes_written: u64,
    pub copy_list: CopyListReport,
}

/// Terminal state of an extraction call
#[derive(Debug)]
pub enum ExtractOutcome {
    Completed(ExtractReport),
    /// Interrupted through the progress sink; the archive has been deleted
    Cancelled,
    Failed(ExtractFailure),
}

impl ExtractOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExtractOutcome::Completed(_))
    }

    pub fn payload(&self) -> Option<&Path> {
        match self {
            ExtractOutcome::Completed(report) => report.payload.as_deref(),
            _ => None,
        }
    }

    pub fn report(&self) -> Option<&ExtractReport> {
        match self {
            ExtractOutcome::Completed(report) => Some(report),
            _ => None,
        }
    }
}

/// Why an extraction failed
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExtractFailure {
    #[error("Failed to open archive {path}: {reason}")]
    Open { path: PathBuf, reason: String },

    #[error("Not enough free space: need {required} bytes, {available} available")]
    InsufficientSpace { required: u64, available: u64 },

    #[error("Failed to write {entry}: {reason}")]
    EntryWrite { entry: String, reason: String },

    #[error("Archive data is unreadable: {0}")]
    Read(String),

    #[error("{0} entries did not match the expected cheat layout")]
    UnexpectedLayout(usize),
}

/// What to do with one entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum EntryPlan {
    Write { dest: PathBuf, renamed: bool },
    Dir(PathBuf),
    Preserve,
    Skip,
}

/// Streams archives onto disk. Cheap to construct; holds no open files.
pub struct ArchiveExtractor {
    progress: Arc<ProgressSink>,
    space: Box<dyn SpaceSource>,
    preserve_list: Option<PathBuf>,
    copy_list: Option<PathBuf>,
    /// Root that copy-list paths resolve against
    root: PathBuf,
}

impl ArchiveExtractor {
    pub fn new(progress: Arc<ProgressSink>) -> Self {
        Self {
            progress,
            space: Box::new(SystemSpace),
            preserve_list: None,
            copy_list: None,
            root: PathBuf::from("/"),
        }
    }

    /// Extractor wired to the layout's preserve and copy lists.
    pub fn for_layout(layout: &Layout, progress: Arc<ProgressSink>) -> Self {
        Self {
            preserve_list: Some(layout.preserve_list()),
            copy_list: Some(layout.copy_list()),
            root: layout.root.clone(),
            ..Self::new(progress)
        }
    }

    pub fn with_space_source(mut self, space: impl SpaceSource + 'static) -> Self {
        self.space = Box::new(space);
        self
    }

    pub fn with_preserve_list(mut self, path: impl Into<PathBuf>) -> Self {
        self.preserve_list = Some(path.into());
        self
    }

    pub fn with_copy_list(mut self, path: impl Into<PathBuf>, root: impl Into<PathBuf>) -> Self {
        self.copy_list = Some(path.into());
        self.root = root.into();
        self
    }

    pub fn progress(&self) -> &Arc<ProgressSink> {
        &self.progress
    }

    /// Extract a firmware or homebrew package.
    pub fn extract(&self, archive_path: &Path, target: &ExtractionTarget) -> ExtractOutcome {
        match open_reader(archive_path) {
            Ok(mut reader) => self.extract_with_reader(archive_path, reader.as_mut(), target),
            Err(failure) => ExtractOutcome::Failed(failure),
        }
    }

    /// Package extraction from an already opened reader.
    ///
    /// `archive_path` is still needed: it is deleted when extraction ends.
    pub fn extract_with_reader(
        &self,
        archive_path: &Path,
        reader: &mut dyn ArchiveReader,
        target: &ExtractionTarget,
    ) -> ExtractOutcome {
        info!(
            "Extracting {} to {} ({})",
            archive_path.display(),
            target.output_dir.display(),
            target.cfw
        );

        let preserve = self
            .preserve_list
            .as_deref()
            .map(PreserveRules::load)
            .unwrap_or_default();

        let mut payload = None;
        let outcome = self.run(
            archive_path,
            reader,
            &target.output_dir,
            target.on_entry_error,
            &mut |entry| {
                let plan = plan_package_entry(entry, target, &preserve);
                if let EntryPlan::Write { dest, .. } = &plan {
                    if paths::file_name(&entry.path).starts_with(PAYLOAD_PREFIX) {
                        debug!("Detected bootloader payload: {}", entry.path);
                        payload = Some(dest.clone());
                    }
                }
                plan
            },
        );

        match outcome {
            ExtractOutcome::Completed(mut report) => {
                report.payload = payload;
                if let Some(list) = &self.copy_list {
                    report.copy_list = copy_list::apply(list, &self.root);
                }
                ExtractOutcome::Completed(report)
            }
            other => other,
        }
    }

    /// Shared streaming loop. `plan` decides the fate of each entry.
    pub(crate) fn run(
        &self,
        archive_path: &Path,
        reader: &mut dyn ArchiveReader,
        output_dir: &Path,
        policy: EntryFailurePolicy,
        plan: &mut dyn FnMut(&ArchiveEntry) -> EntryPlan,
    ) -> ExtractOutcome {
        let progress = &self.progress;

        let entries = match reader.entries() {
            Ok(entries) => entries,
            Err(e) => {
                error!("Failed to list {}: {:#}", archive_path.display(), e);
                return ExtractOutcome::Failed(ExtractFailure::Open {
                    path: archive_path.to_path_buf(),
                    reason: format!("{:#}", e),
                });
            }
        };

        let total_entries = entries.len();
        let total_bytes: u64 = entries.iter().filter(|e| !e.is_dir).map(|e| e.size).sum();
        progress.set_total_steps(total_entries as u64);
        progress.set_step(0);
        progress.set_total(total_bytes);
        progress.set_now(0);

        if let Err(failure) = self.check_space(output_dir, total_bytes) {
            remove_archive(archive_path);
            progress.finish_steps();
            return ExtractOutcome::Failed(failure);
        }

        let started = Instant::now();
        let mut report = ExtractReport::default();
        let mut processed = 0usize;
        let mut bytes_done = 0u64;
        let mut cancelled = false;
        let mut aborted: Option<ExtractFailure> = None;

        let walk = reader.for_each_entry(&mut |entry, data| {
            if progress.interrupted() {
                cancelled = true;
                return Ok(EntryFlow::Stop);
            }

            match plan(entry) {
                EntryPlan::Skip => report.skipped += 1,
                EntryPlan::Preserve => {
                    debug!("Preserving existing file for {}", entry.path);
                    report.preserved += 1;
                }
                EntryPlan::Dir(dir) => match std::fs::create_dir_all(&dir) {
                    Ok(()) => report.directories += 1,
                    Err(e) => {
                        warn!("Failed to create directory {}: {}", dir.display(), e);
                        if policy == EntryFailurePolicy::Abort {
                            aborted = Some(ExtractFailure::EntryWrite {
                                entry: entry.path.clone(),
                                reason: e.to_string(),
                            });
                            return Ok(EntryFlow::Stop);
                        }
                        report.failed += 1;
                    }
                },
                EntryPlan::Write { dest, renamed } => match write_file(data, &dest) {
                    Ok(written) => {
                        report.files_written += 1;
                        report.bytes_written += written;
                        if renamed {
                            report.renamed += 1;
                        }
                    }
                    Err(CopyError::Read(e)) => {
                        return Err(anyhow::anyhow!("Failed to decompress {}: {}", entry.path, e));
                    }
                    Err(CopyError::Write(e)) => {
                        warn!("Failed to write {}: {}", dest.display(), e);
                        if policy == EntryFailurePolicy::Abort {
                            aborted = Some(ExtractFailure::EntryWrite {
                                entry: entry.path.clone(),
                                reason: e.to_string(),
                            });
                            return Ok(EntryFlow::Stop);
                        }
                        report.failed += 1;
                    }
                },
            }

            processed += 1;
            if !entry.is_dir {
                bytes_done += entry.size;
            }
            if processed % PROGRESS_BATCH == 0 || processed == total_entries {
                progress.set_step(processed as u64);
                progress.set_now(bytes_done);
                let secs = started.elapsed().as_secs_f64();
                if secs > 0.0 {
                    progress.set_speed(bytes_done as f64 / secs);
                }
            }
            Ok(EntryFlow::Continue)
        });

        // Past the space check the archive is consumed exactly once.
        remove_archive(archive_path);

        if cancelled {
            info!("Extraction of {} cancelled", archive_path.display());
            progress.finish_steps();
            return ExtractOutcome::Cancelled;
        }
        if let Some(failure) = aborted {
            error!("Extraction of {} aborted: {}", archive_path.display(), failure);
            progress.finish_steps();
            return ExtractOutcome::Failed(failure);
        }
        if let Err(e) = walk {
            error!("Extraction of {} failed: {:#}", archive_path.display(), e);
            progress.finish_steps();
            return ExtractOutcome::Failed(ExtractFailure::Read(format!("{:#}", e)));
        }

        progress.set_step(total_entries as u64);
        info!(
            "Extracted {}: {} files, {} preserved, {} skipped, {} failed",
            archive_path.display(),
            report.files_written,
            report.preserved,
            report.skipped,
            report.failed
        );
        ExtractOutcome::Completed(report)
    }

    /// Refuse when the content plus a 10% margin won't fit.
    pub(crate) fn check_space(&self, output_dir: &Path, uncompressed: u64) -> Result<(), ExtractFailure> {
        let required = space::required_with_margin(uncompressed);
        match self.space.free_bytes(output_dir) {
            Some(available) if required > available => {
                warn!(
                    "Not enough space in {}: need {} bytes, {} available",
                    output_dir.display(),
                    required,
                    available
                );
                Err(ExtractFailure::InsufficientSpace { required, available })
            }
            Some(_) => Ok(()),
            None => {
                warn!("Could not determine free space for {}, continuing", output_dir.display());
                Ok(())
            }
        }
    }
}

/// Open `path` with the matching backend, mapping errors to a failure value.
pub(crate) fn open_reader(path: &Path) -> Result<Box<dyn ArchiveReader>, ExtractFailure> {
    archive::open_archive(path).map_err(|e| {
        error!("Failed to open {}: {:#}", path.display(), e);
        ExtractFailure::Open {
            path: path.to_path_buf(),
            reason: format!("{:#}", e),
        }
    })
}

/// Decide placement for one package entry.
fn plan_package_entry(entry: &ArchiveEntry, target: &ExtractionTarget, preserve: &PreserveRules) -> EntryPlan {
    let raw = paths::normalize_entry(&entry.path);
    let relative = paths::strip_root(&raw);

    if relative.is_empty() {
        return EntryPlan::Skip;
    }
    if !paths::is_contained(relative) {
        warn!("Skipping entry that escapes the output directory: {}", entry.path);
        return EntryPlan::Skip;
    }
    if target.preserve_inis && raw.contains(".ini") {
        debug!("Skipping ini file: {}", entry.path);
        return EntryPlan::Skip;
    }

    let dest = paths::join_output(&target.output_dir, relative);
    if entry.is_dir || raw.ends_with('/') {
        return EntryPlan::Dir(dest);
    }

    // Matched on the raw name, before slash normalization
    if preserve.should_skip(&entry.path, &dest) {
        return EntryPlan::Preserve;
    }

    if PROTECTED_FILES.contains(&relative) {
        let mut renamed = dest.into_os_string();
        renamed.push(PROTECTED_SUFFIX);
        debug!("Writing in-use system file {} under {}", relative, PROTECTED_SUFFIX);
        return EntryPlan::Write {
            dest: PathBuf::from(renamed),
            renamed: true,
        };
    }

    EntryPlan::Write { dest, renamed: false }
}

pub(crate) fn write_file(data: &mut dyn Read, dest: &Path) -> Result<u64, CopyError> {
    paths::ensure_parent_dirs(dest).map_err(CopyError::Write)?;
    let file = File::create(dest).map_err(CopyError::Write)?;
    let mut writer = BufWriter::with_capacity(WRITE_CHUNK, file);
    archive::copy_chunked(data, &mut writer, WRITE_CHUNK)
}

pub(crate) fn remove_archive(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed archive {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove archive {}: {}", path.display(), e),
    }
}
