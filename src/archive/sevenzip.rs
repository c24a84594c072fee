//! 7z backend (sevenz-rust2).
//!
//! sevenz-rust2 drives decompression itself and hands each entry to a
//! callback, so errors raised by our visitor are parked outside the
//! callback and the walk is stopped by returning `false`.

use super::{ArchiveEntry, ArchiveReader, EntryFlow, EntryVisitor};

use anyhow::{anyhow, Result};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

pub struct SevenZReader {
    path: PathBuf,
}

impl SevenZReader {
    pub fn open(path: &Path) -> Result<Self> {
        // Parse the header once up front so corrupt archives fail here.
        sevenz_rust2::Archive::open(path)
            .map_err(|e| anyhow!("Failed to read 7z archive {}: {}", path.display(), e))?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl ArchiveReader for SevenZReader {
    fn entries(&mut self) -> Result<Vec<ArchiveEntry>> {
        let archive = sevenz_rust2::Archive::open(&self.path)
            .map_err(|e| anyhow!("Failed to read 7z archive {}: {}", self.path.display(), e))?;

        Ok(archive
            .files
            .iter()
            .map(|f| ArchiveEntry {
                path: f.name().replace('\\', "/"),
                size: f.size(),
                is_dir: f.is_directory(),
            })
            .collect())
    }

    fn for_each_entry(&mut self, visit: &mut EntryVisitor<'_>) -> Result<()> {
        let file = File::open(&self.path)
            .map_err(|e| anyhow!("Failed to open 7z archive {}: {}", self.path.display(), e))?;
        // Only used as the nominal destination; nothing is written there.
        let scratch = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let mut parked: Option<anyhow::Error> = None;
        let result = sevenz_rust2::decompress_with_extract_fn(file, &scratch, |entry, reader, _dest| {
            let meta = ArchiveEntry {
                path: entry.name().replace('\\', "/"),
                size: entry.size(),
                is_dir: entry.is_directory(),
            };
            match visit(&meta, reader) {
                Ok(EntryFlow::Continue) => {}
                Ok(EntryFlow::Stop) => return Ok(false),
                Err(e) => {
                    parked = Some(e);
                    return Ok(false);
                }
            }
            // Solid blocks must be consumed in full before the next entry.
            if let Err(e) = io::copy(reader, &mut io::sink()) {
                parked = Some(anyhow!("Failed to decompress {}: {}", meta.path, e));
                return Ok(false);
            }
            Ok(true)
        });

        if let Some(e) = parked {
            return Err(e);
        }
        result.map_err(|e| anyhow!("Failed to decompress 7z archive {}: {}", self.path.display(), e))
    }
}
