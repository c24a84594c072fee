//! Title-mod placement: archives of romfs/exefs content for one game.

use super::{open_reader, ArchiveExtractor, EntryFailurePolicy, EntryPlan, ExtractOutcome};
use crate::archive::{ArchiveEntry, ArchiveReader};
use crate::config::{Layout, SPECIAL_MODS_TITLE_ID};
use crate::paths;
use crate::titles;

use std::path::{Path, PathBuf};
use tracing::{debug, info};

const ROMFS_MARKER: &str = "romfs/";
const EXEFS_PATCHES_MARKER: &str = "exefs_patches/";
const EXEFS_MARKER: &str = "exefs/";

/// Destination for a title mod
#[derive(Debug, Clone)]
pub struct TitleModTarget {
    /// Firmware folder that holds `contents/` and `exefs_patches/`
    pub output_dir: PathBuf,
    pub title_id: String,
    /// Verbatim destination for the special-cased title
    pub special_dir: PathBuf,
    pub on_entry_error: EntryFailurePolicy,
}

impl TitleModTarget {
    pub fn new(layout: &Layout, title_id: impl Into<String>) -> Self {
        Self {
            output_dir: layout.install_base.clone(),
            title_id: title_id.into(),
            special_dir: layout.special_mods_dir(),
            on_entry_error: EntryFailurePolicy::Continue,
        }
    }

    pub fn on_entry_error(mut self, policy: EntryFailurePolicy) -> Self {
        self.on_entry_error = policy;
        self
    }

    fn is_special(&self) -> bool {
        self.title_id.eq_ignore_ascii_case(SPECIAL_MODS_TITLE_ID)
    }

    fn root_dir(&self) -> &Path {
        if self.is_special() {
            &self.special_dir
        } else {
            &self.output_dir
        }
    }

    /// Map an entry name to its place on disk, or `None` if it carries no
    /// romfs/exefs marker.
    fn place(&self, entry_name: &str) -> Option<PathBuf> {
        let name = paths::normalize_entry(entry_name);
        let name = paths::truncate_at_pipe(&name);
        let relative = paths::strip_root(name);

        if self.is_special() {
            return Some(self.special_dir.join(relative));
        }

        let title_dir = titles::title_contents_dir(&self.output_dir, &self.title_id);
        if let Some(idx) = relative.find(ROMFS_MARKER) {
            Some(title_dir.join(&relative[idx..]))
        } else if let Some(idx) = relative.find(EXEFS_PATCHES_MARKER) {
            Some(self.output_dir.join(&relative[idx..]))
        } else {
            relative.find(EXEFS_MARKER).map(|idx| title_dir.join(&relative[idx..]))
        }
    }

    fn plan(&self, entry: &ArchiveEntry) -> EntryPlan {
        let name = paths::normalize_entry(&entry.path);
        if !paths::is_contained(paths::truncate_at_pipe(&name)) {
            return EntryPlan::Skip;
        }

        match self.place(&entry.path) {
            Some(dest) if dest.as_path() == self.root_dir() => EntryPlan::Skip,
            Some(dest) if entry.is_dir || name.ends_with('/') => EntryPlan::Dir(dest),
            Some(dest) => EntryPlan::Write { dest, renamed: false },
            None => {
                debug!("No romfs/exefs marker in {}, skipping", entry.path);
                EntryPlan::Skip
            }
        }
    }
}

impl ArchiveExtractor {
    /// Extract a mod for one title into its `contents/<title-id>` tree.
    pub fn extract_title_mod(&self, archive_path: &Path, target: &TitleModTarget) -> ExtractOutcome {
        match open_reader(archive_path) {
            Ok(mut reader) => self.extract_title_mod_with_reader(archive_path, reader.as_mut(), target),
            Err(failure) => ExtractOutcome::Failed(failure),
        }
    }

    pub fn extract_title_mod_with_reader(
        &self,
        archive_path: &Path,
        reader: &mut dyn ArchiveReader,
        target: &TitleModTarget,
    ) -> ExtractOutcome {
        info!(
            "Extracting title mod {} for {} into {}",
            archive_path.display(),
            target.title_id,
            target.root_dir().display()
        );
        self.run(
            archive_path,
            reader,
            target.root_dir(),
            target.on_entry_error,
            &mut |entry| target.plan(entry),
        )
    }
}
