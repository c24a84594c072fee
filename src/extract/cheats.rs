//! Cheat database extraction.
//!
//! Cheat databases are ZIPs laid out as `<prefix><title-id>/cheats/...`
//! where the prefix depends on the firmware. Entries are addressed by
//! index, and only titles the user has installed are written unless the
//! caller asks for everything.

use super::{remove_archive, ExtractFailure, ExtractOutcome, ExtractReport, SpaceSource, SystemSpace};
use crate::archive::{IndexedArchive, ZipReader};
use crate::config::Layout;
use crate::paths::{self, CfwVariant};
use crate::progress::ProgressSink;

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Version tag that means "no real version, don't record it".
pub const OFFLINE_VERSION: &str = "offline";

/// Parameters of one cheat extraction
#[derive(Debug, Clone)]
pub struct CheatRequest {
    /// Installed title-ids, any case
    pub allowed_titles: Vec<String>,
    pub cfw: CfwVariant,
    /// Database version to record on success
    pub version: String,
    /// Ignore `allowed_titles` and extract every cheat
    pub extract_all: bool,
    /// Fail when files don't follow the expected layout
    pub strict_layout: bool,
}

impl CheatRequest {
    pub fn new(cfw: CfwVariant, allowed_titles: Vec<String>) -> Self {
        Self {
            allowed_titles,
            cfw,
            version: String::new(),
            extract_all: false,
            strict_layout: false,
        }
    }
}

pub struct CheatSetExtractor {
    progress: Arc<ProgressSink>,
    space: Box<dyn SpaceSource>,
    layout: Layout,
    version_file: PathBuf,
}

impl CheatSetExtractor {
    pub fn new(layout: &Layout, progress: Arc<ProgressSink>) -> Self {
        Self {
            progress,
            space: Box::new(SystemSpace),
            layout: layout.clone(),
            version_file: layout.cheats_version_file(),
        }
    }

    pub fn with_space_source(mut self, space: impl SpaceSource + 'static) -> Self {
        self.space = Box::new(space);
        self
    }

    /// Last recorded database version, if any.
    pub fn installed_version(&self) -> Option<String> {
        let text = std::fs::read_to_string(&self.version_file).ok()?;
        let version = text.trim();
        (!version.is_empty()).then(|| version.to_string())
    }

    pub fn extract(&self, archive_path: &Path, request: &CheatRequest) -> ExtractOutcome {
        match ZipReader::open(archive_path) {
            Ok(mut archive) => self.extract_indexed(archive_path, &mut archive, request),
            Err(e) => {
                error!("Failed to open cheat archive {}: {:#}", archive_path.display(), e);
                ExtractOutcome::Failed(ExtractFailure::Open {
                    path: archive_path.to_path_buf(),
                    reason: format!("{:#}", e),
                })
            }
        }
    }

    pub fn extract_indexed(
        &self,
        archive_path: &Path,
        archive: &mut dyn IndexedArchive,
        request: &CheatRequest,
    ) -> ExtractOutcome {
        let progress = &self.progress;
        let cfw = request.cfw;
        let base = self.layout.cfw_dir(cfw);

        let mut entries = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            match archive.entry_at(i) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    error!("Failed to list {}: {:#}", archive_path.display(), e);
                    return ExtractOutcome::Failed(ExtractFailure::Open {
                        path: archive_path.to_path_buf(),
                        reason: format!("{:#}", e),
                    });
                }
            }
        }

        let total_bytes: u64 = entries.iter().filter(|e| !e.is_dir).map(|e| e.size).sum();
        let required = super::space::required_with_margin(total_bytes);
        if let Some(available) = self.space.free_bytes(&self.layout.root) {
            if required > available {
                warn!("Not enough space for cheats: need {} bytes, {} available", required, available);
                return ExtractOutcome::Failed(ExtractFailure::InsufficientSpace { required, available });
            }
        }

        let titles_dir = base.join(cfw.titles_prefix());
        if let Err(e) = std::fs::create_dir_all(&titles_dir) {
            warn!("Failed to create {}: {}", titles_dir.display(), e);
        }

        let allowed: HashSet<String> = request
            .allowed_titles
            .iter()
            .map(|t| t.to_ascii_uppercase())
            .collect();
        info!(
            "Extracting cheats from {} for {} ({} titles{})",
            archive_path.display(),
            cfw,
            allowed.len(),
            if request.extract_all { ", all" } else { "" }
        );

        progress.set_total_steps(entries.len() as u64);
        progress.set_step(0);
        progress.set_total(total_bytes);

        let mut report = ExtractReport::default();
        let mut cancelled = false;
        for (index, entry) in entries.iter().enumerate() {
            if progress.interrupted() {
                cancelled = true;
                break;
            }

            let name = paths::normalize_entry(&entry.path);
            let is_dir = entry.is_dir || name.ends_with('/');
            match paths::cheat_title_id(&name, cfw) {
                None => {
                    if !is_dir {
                        debug!("Not a cheat entry for {}: {}", cfw, name);
                        report.malformed += 1;
                    }
                    report.skipped += 1;
                }
                Some(title)
                    if request.extract_all || allowed.contains(&title.to_ascii_uppercase()) =>
                {
                    let relative = paths::strip_root(&name);
                    if !paths::is_contained(relative) {
                        warn!("Skipping cheat entry outside its folder: {}", name);
                        report.skipped += 1;
                    } else {
                        let dest = base.join(relative);
                        if is_dir {
                            match std::fs::create_dir_all(&dest) {
                                Ok(()) => report.directories += 1,
                                Err(e) => {
                                    warn!("Failed to create {}: {}", dest.display(), e);
                                    report.failed += 1;
                                }
                            }
                        } else {
                            match write_indexed(archive, index, &dest) {
                                Ok(written) => {
                                    report.files_written += 1;
                                    report.bytes_written += written;
                                }
                                Err(e) => {
                                    warn!("Failed to extract {}: {:#}", name, e);
                                    report.failed += 1;
                                }
                            }
                        }
                    }
                }
                Some(_) => report.skipped += 1,
            }

            let done = index + 1;
            if done % 10 == 0 || done == entries.len() {
                progress.set_step(done as u64);
                progress.set_now(report.bytes_written);
            }
        }

        remove_archive(archive_path);

        if cancelled {
            info!("Cheat extraction cancelled");
            progress.finish_steps();
            return ExtractOutcome::Cancelled;
        }

        if request.strict_layout && report.malformed > 0 {
            error!("{} entries in {} don't follow the {} layout", report.malformed, archive_path.display(), cfw);
            return ExtractOutcome::Failed(ExtractFailure::UnexpectedLayout(report.malformed));
        }
        if report.malformed > 0 {
            warn!("{} entries did not match the {} cheat layout and were skipped", report.malformed, cfw);
        }

        self.record_version(&request.version);
        info!("Extracted {} cheat files", report.files_written);
        ExtractOutcome::Completed(report)
    }

    fn record_version(&self, version: &str) {
        let version = version.trim();
        if version.is_empty() || version == OFFLINE_VERSION {
            return;
        }
        let result = paths::ensure_parent_dirs(&self.version_file)
            .and_then(|_| std::fs::write(&self.version_file, format!("{}\n", version)));
        if let Err(e) = result {
            warn!("Failed to record cheat version in {}: {}", self.version_file.display(), e);
        }
    }
}

fn write_indexed(archive: &mut dyn IndexedArchive, index: usize, dest: &Path) -> anyhow::Result<u64> {
    paths::ensure_parent_dirs(dest)?;
    let file = File::create(dest)?;
    let mut writer = BufWriter::with_capacity(super::WRITE_CHUNK, file);
    let written = archive.read_at(index, &mut writer)?;
    writer.flush()?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::tests::make_zip;
    use crate::extract::FixedSpace;
    use anyhow::Result;
    use std::fs;
    use tempfile::tempdir;

    const MARIO: &str = "0100000000010000";
    const ZELDA: &str = "01007EF00011E000";

    fn database(path: &Path, prefix: &str) -> Result<()> {
        let mario = format!("{}{}/cheats/ABCDEF0123456789.txt", prefix, MARIO);
        let zelda_dir = format!("{}{}/cheats/", prefix, ZELDA);
        let zelda = format!("{}{}/cheats/0011223344556677.txt", prefix, ZELDA);
        make_zip(
            path,
            &[
                (mario.as_str(), b"[Moon Jump]"),
                (zelda_dir.as_str(), b""),
                (zelda.as_str(), b"[Infinite Hearts]"),
                ("README.md", b"cheat db"),
            ],
        )
    }

    fn extractor(root: &Path) -> CheatSetExtractor {
        CheatSetExtractor::new(&Layout::new(root), Arc::new(ProgressSink::new()))
            .with_space_source(FixedSpace(u64::MAX))
    }

    #[test]
    fn test_only_allowed_titles_extracted() -> Result<()> {
        let dir = tempdir()?;
        let archive = dir.path().join("titles.zip");
        database(&archive, "contents/")?;

        let mut request = CheatRequest::new(CfwVariant::Atmosphere, vec![ZELDA.to_lowercase()]);
        request.version = "v4.2".to_string();
        let ex = extractor(dir.path());
        let report = ex.extract(&archive, &request).report().cloned().expect("completed");

        let base = dir.path().join("atmosphere/contents");
        assert!(base.join(ZELDA).join("cheats/0011223344556677.txt").exists());
        assert!(!base.join(MARIO).exists());
        assert_eq!(report.files_written, 1);
        assert_eq!(report.malformed, 1);
        assert!(!archive.exists());
        assert_eq!(ex.installed_version().as_deref(), Some("v4.2"));
        Ok(())
    }

    #[test]
    fn test_extract_all_sxos_layout() -> Result<()> {
        let dir = tempdir()?;
        let archive = dir.path().join("titles.zip");
        database(&archive, "titles/")?;

        let mut request = CheatRequest::new(CfwVariant::Sxos, Vec::new());
        request.extract_all = true;
        request.version = OFFLINE_VERSION.to_string();
        let ex = extractor(dir.path());
        let report = ex.extract(&archive, &request).report().cloned().expect("completed");

        let base = dir.path().join("sxos/titles");
        assert!(base.join(MARIO).join("cheats/ABCDEF0123456789.txt").exists());
        assert!(base.join(ZELDA).join("cheats/0011223344556677.txt").exists());
        assert_eq!(report.files_written, 2);
        assert_eq!(ex.installed_version(), None);
        Ok(())
    }

    #[test]
    fn test_wrong_variant_extracts_nothing() -> Result<()> {
        let dir = tempdir()?;
        let archive = dir.path().join("titles.zip");
        database(&archive, "titles/")?;

        let mut request = CheatRequest::new(CfwVariant::Atmosphere, Vec::new());
        request.extract_all = true;
        let report = extractor(dir.path())
            .extract(&archive, &request)
            .report()
            .cloned()
            .expect("completed");
        assert_eq!(report.files_written, 0);
        assert_eq!(report.malformed, 3);
        Ok(())
    }

    #[test]
    fn test_strict_layout_fails() -> Result<()> {
        let dir = tempdir()?;
        let archive = dir.path().join("titles.zip");
        database(&archive, "contents/")?;

        let mut request = CheatRequest::new(CfwVariant::Atmosphere, vec![MARIO.to_string()]);
        request.strict_layout = true;
        request.version = "v1".to_string();
        let ex = extractor(dir.path());
        let outcome = ex.extract(&archive, &request);
        assert!(matches!(outcome, ExtractOutcome::Failed(ExtractFailure::UnexpectedLayout(1))));
        assert_eq!(ex.installed_version(), None);
        Ok(())
    }

    #[test]
    fn test_no_space_keeps_archive() -> Result<()> {
        let dir = tempdir()?;
        let archive = dir.path().join("titles.zip");
        database(&archive, "contents/")?;

        let ex = CheatSetExtractor::new(&Layout::new(dir.path()), Arc::new(ProgressSink::new()))
            .with_space_source(FixedSpace(1));
        let outcome = ex.extract(&archive, &CheatRequest::new(CfwVariant::Atmosphere, Vec::new()));
        assert!(matches!(outcome, ExtractOutcome::Failed(ExtractFailure::InsufficientSpace { .. })));
        assert!(archive.exists());
        Ok(())
    }

    #[test]
    fn test_interrupt_before_start_cancels() -> Result<()> {
        let dir = tempdir()?;
        let archive = dir.path().join("titles.zip");
        database(&archive, "contents/")?;

        let sink = Arc::new(ProgressSink::new());
        sink.set_interrupt(true);
        let ex = CheatSetExtractor::new(&Layout::new(dir.path()), Arc::clone(&sink))
            .with_space_source(FixedSpace(u64::MAX));
        let mut request = CheatRequest::new(CfwVariant::Atmosphere, Vec::new());
        request.extract_all = true;
        request.version = "v9".to_string();

        let outcome = ex.extract(&archive, &request);
        assert!(matches!(outcome, ExtractOutcome::Cancelled));
        assert!(!archive.exists());
        assert_eq!(ex.installed_version(), None);
        assert!(sink.interrupted());
        Ok(())
    }
}
