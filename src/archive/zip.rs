//! ZIP backend (zip crate).

use super::{ArchiveEntry, ArchiveReader, EntryFlow, EntryVisitor, IndexedArchive};

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

pub struct ZipReader {
    path: PathBuf,
    archive: ::zip::ZipArchive<BufReader<File>>,
}

impl ZipReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open ZIP: {}", path.display()))?;
        let archive = ::zip::ZipArchive::new(BufReader::new(file))
            .with_context(|| format!("Failed to read ZIP: {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            archive,
        })
    }
}

impl ArchiveReader for ZipReader {
    fn entries(&mut self) -> Result<Vec<ArchiveEntry>> {
        let mut entries = Vec::with_capacity(self.archive.len());
        for i in 0..self.archive.len() {
            entries.push(self.entry_at(i)?);
        }
        Ok(entries)
    }

    fn for_each_entry(&mut self, visit: &mut EntryVisitor<'_>) -> Result<()> {
        for i in 0..self.archive.len() {
            let mut file = self
                .archive
                .by_index(i)
                .with_context(|| format!("Failed to read entry {} of {}", i, self.path.display()))?;
            let entry = ArchiveEntry {
                path: file.name().to_string(),
                size: file.size(),
                is_dir: file.is_dir(),
            };
            if visit(&entry, &mut file)? == EntryFlow::Stop {
                break;
            }
        }
        Ok(())
    }
}

impl IndexedArchive for ZipReader {
    fn len(&self) -> usize {
        self.archive.len()
    }

    fn entry_at(&mut self, index: usize) -> Result<ArchiveEntry> {
        let file = self
            .archive
            .by_index_raw(index)
            .with_context(|| format!("Failed to read entry {} of {}", index, self.path.display()))?;
        Ok(ArchiveEntry {
            path: file.name().to_string(),
            size: file.size(),
            is_dir: file.is_dir(),
        })
    }

    fn read_at(&mut self, index: usize, out: &mut dyn Write) -> Result<u64> {
        let mut file = self
            .archive
            .by_index(index)
            .with_context(|| format!("Failed to read entry {} of {}", index, self.path.display()))?;
        let copied = std::io::copy(&mut file, out)
            .with_context(|| format!("Failed to decompress {}", file.name()))?;
        Ok(copied)
    }
}
