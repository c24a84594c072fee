//! Tarball backend (tar + flate2).
//!
//! Tar streams can only be read front to back, so every pass reopens the
//! file.

use super::{ArchiveEntry, ArchiveReader, EntryFlow, EntryVisitor};

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct TarReader {
    path: PathBuf,
    gzip: bool,
}

impl TarReader {
    pub fn open(path: &Path, gzip: bool) -> Result<Self> {
        // Touch the first header now so a damaged file fails at open time.
        let reader = Self {
            path: path.to_path_buf(),
            gzip,
        };
        let mut archive = reader.stream()?;
        let mut entries = archive
            .entries()
            .with_context(|| format!("Failed to read tar: {}", path.display()))?;
        if let Some(first) = entries.next() {
            first.with_context(|| format!("Failed to read tar header: {}", path.display()))?;
        }
        Ok(reader)
    }

    fn stream(&self) -> Result<::tar::Archive<Box<dyn Read>>> {
        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open tar: {}", self.path.display()))?;
        let inner: Box<dyn Read> = if self.gzip {
            Box::new(GzDecoder::new(BufReader::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };
        Ok(::tar::Archive::new(inner))
    }

    fn visit_all(
        &self,
        mut on_entry: impl FnMut(ArchiveEntry, &mut dyn Read) -> Result<EntryFlow>,
    ) -> Result<()> {
        let mut archive = self.stream()?;
        let entries = archive
            .entries()
            .with_context(|| format!("Failed to read tar: {}", self.path.display()))?;

        for entry in entries {
            let mut entry =
                entry.with_context(|| format!("Failed to read tar entry in {}", self.path.display()))?;
            let kind = entry.header().entry_type();
            if !kind.is_file() && !kind.is_dir() {
                debug!("Skipping non-regular tar member of type {:?}", kind);
                continue;
            }

            let path = entry
                .path()
                .context("Invalid tar entry path")?
                .to_string_lossy()
                .replace('\\', "/");
            let meta = ArchiveEntry {
                path,
                size: entry.size(),
                is_dir: kind.is_dir(),
            };
            if on_entry(meta, &mut entry)? == EntryFlow::Stop {
                break;
            }
        }
        Ok(())
    }
}

impl ArchiveReader for TarReader {
    fn entries(&mut self) -> Result<Vec<ArchiveEntry>> {
        let mut entries = Vec::new();
        self.visit_all(|entry, _| {
            entries.push(entry);
            Ok(EntryFlow::Continue)
        })?;
        Ok(entries)
    }

    fn for_each_entry(&mut self, visit: &mut EntryVisitor<'_>) -> Result<()> {
        self.visit_all(|entry, data| visit(&entry, data))
    }
}
