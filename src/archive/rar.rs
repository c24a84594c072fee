//! RAR backend (unrar).
//!
//! unrar walks the archive with a typestate cursor: each header must be
//! either extracted or skipped before the next one is available. Entry
//! data is only decompressed when the visitor reads from it, and then to
//! a spool file next to the archive rather than into memory.

use super::{ArchiveEntry, ArchiveReader, EntryFlow, EntryVisitor};

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

type BeforeHeader = unrar::OpenArchive<unrar::Process, unrar::CursorBeforeHeader>;
type BeforeFile = unrar::OpenArchive<unrar::Process, unrar::CursorBeforeFile>;

pub struct RarReader {
    path: PathBuf,
}

impl RarReader {
    pub fn open(path: &Path) -> Result<Self> {
        let archive = unrar::Archive::new(path)
            .open_for_processing()
            .with_context(|| format!("Failed to open RAR: {}", path.display()))?;
        archive
            .read_header()
            .with_context(|| format!("Failed to read RAR header: {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Walk every header. With `want_data`, file entries get a lazy
    /// reader; otherwise every entry is skipped.
    fn walk(
        &self,
        want_data: bool,
        mut on_entry: impl FnMut(&ArchiveEntry, &mut dyn Read) -> Result<EntryFlow>,
    ) -> Result<()> {
        let archive = unrar::Archive::new(&self.path)
            .open_for_processing()
            .with_context(|| format!("Failed to open RAR: {}", self.path.display()))?;

        let scratch = if want_data {
            let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
            Some(tempfile::tempdir_in(parent).context("Failed to create RAR spool directory")?)
        } else {
            None
        };

        let mut cursor = Some(archive);
        while let Some(archive) = cursor.take() {
            let Some(entry) = archive.read_header().context("Failed to read RAR header")? else {
                break;
            };

            let header = entry.entry();
            let meta = ArchiveEntry {
                path: header.filename.to_string_lossy().replace('\\', "/"),
                size: header.unpacked_size as u64,
                is_dir: header.is_directory(),
            };

            let flow = match (&scratch, header.is_file()) {
                (Some(scratch), true) => {
                    let spool = scratch.path().join("entry");
                    let mut data = SpooledEntry::new(entry, spool.clone());
                    let flow = on_entry(&meta, &mut data);
                    let next = data.finish();
                    fs::remove_file(&spool).ok();

                    let flow = flow?;
                    cursor = Some(next.with_context(|| format!("Failed to advance past RAR entry: {}", meta.path))?);
                    flow
                }
                _ => {
                    cursor = Some(entry.skip().context("Failed to skip RAR entry")?);
                    on_entry(&meta, &mut io::empty())?
                }
            };

            if flow == EntryFlow::Stop {
                break;
            }
        }
        Ok(())
    }
}

/// Reader over one RAR member that extracts it on first read.
struct SpooledEntry {
    pending: Option<BeforeFile>,
    next: Option<BeforeHeader>,
    spool: PathBuf,
    file: Option<File>,
}

impl SpooledEntry {
    fn new(entry: BeforeFile, spool: PathBuf) -> Self {
        Self {
            pending: Some(entry),
            next: None,
            spool,
            file: None,
        }
    }

    /// Cursor for the next header. Unread entries are skipped.
    fn finish(self) -> Result<BeforeHeader> {
        match (self.next, self.pending) {
            (Some(next), _) => Ok(next),
            (None, Some(pending)) => pending.skip().context("Failed to skip RAR entry"),
            (None, None) => anyhow::bail!("RAR entry extraction failed"),
        }
    }
}

impl Read for SpooledEntry {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.file.is_none() {
            let pending = self
                .pending
                .take()
                .ok_or_else(|| io::Error::other("RAR entry extraction failed"))?;
            let next = pending.extract_to(&self.spool).map_err(io::Error::other)?;
            self.next = Some(next);
            self.file = Some(File::open(&self.spool)?);
        }
        match self.file.as_mut() {
            Some(file) => file.read(buf),
            None => Ok(0),
        }
    }
}

impl ArchiveReader for RarReader {
    fn entries(&mut self) -> Result<Vec<ArchiveEntry>> {
        let mut entries = Vec::new();
        self.walk(false, |entry, _| {
            entries.push(entry.clone());
            Ok(EntryFlow::Continue)
        })?;
        Ok(entries)
    }

    fn for_each_entry(&mut self, visit: &mut EntryVisitor<'_>) -> Result<()> {
        self.walk(true, |entry, data| visit(entry, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Crc;
    use tempfile::tempdir;

    fn crc32(bytes: &[u8]) -> u32 {
        let mut crc = Crc::new();
        crc.update(bytes);
        crc.sum()
    }

    /// Prefix a RAR 1.5-4.x block (type onwards) with its CRC16.
    fn block(body: &[u8]) -> Vec<u8> {
        let mut out = ((crc32(body) & 0xFFFF) as u16).to_le_bytes().to_vec();
        out.extend_from_slice(body);
        out
    }

    /// Build a RAR4 archive of stored (uncompressed) files.
    fn make_rar(path: &Path, files: &[(&str, &[u8])]) -> Result<()> {
        let mut out = b"Rar!\x1A\x07\x00".to_vec();

        let mut main = vec![0x73];
        main.extend_from_slice(&0u16.to_le_bytes());
        main.extend_from_slice(&13u16.to_le_bytes());
        main.extend_from_slice(&[0; 6]);
        out.extend(block(&main));

        for (name, data) in files {
            let mut head = vec![0x74];
            head.extend_from_slice(&0x8000u16.to_le_bytes());
            head.extend_from_slice(&((32 + name.len()) as u16).to_le_bytes());
            head.extend_from_slice(&(data.len() as u32).to_le_bytes());
            head.extend_from_slice(&(data.len() as u32).to_le_bytes());
            head.push(3); // Unix host, `/` separators
            head.extend_from_slice(&crc32(data).to_le_bytes());
            head.extend_from_slice(&0x0021_0000u32.to_le_bytes());
            head.push(20); // unpack version 2.0
            head.push(0x30); // stored
            head.extend_from_slice(&(name.len() as u16).to_le_bytes());
            head.extend_from_slice(&0o100644u32.to_le_bytes());
            head.extend_from_slice(name.as_bytes());
            out.extend(block(&head));
            out.extend_from_slice(data);
        }

        let mut end = vec![0x7B];
        end.extend_from_slice(&0x4000u16.to_le_bytes());
        end.extend_from_slice(&7u16.to_le_bytes());
        out.extend(block(&end));

        fs::write(path, out)?;
        Ok(())
    }

    #[test]
    fn test_not_a_rar_fails_to_open() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("broken.rar");
        fs::write(&path, b"Rar!\x1A\x07\x00 truncated")?;
        assert!(RarReader::open(&path).is_err());
        Ok(())
    }

    #[test]
    fn test_only_read_entries_are_extracted() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("pack.rar");
        make_rar(
            &path,
            &[
                ("switch/app.nro", b"nro bytes"),
                ("atmosphere/config/system.ini", b"[keep]"),
                ("README.txt", b"readme"),
            ],
        )?;

        let mut reader = RarReader::open(&path)?;
        let names: Vec<_> = reader.entries()?.into_iter().map(|e| (e.path, e.size)).collect();
        assert_eq!(
            names,
            vec![
                ("switch/app.nro".to_string(), 9),
                ("atmosphere/config/system.ini".to_string(), 6),
                ("README.txt".to_string(), 6),
            ]
        );

        let mut read = Vec::new();
        let mut seen = 0;
        reader.for_each_entry(&mut |entry, data| {
            seen += 1;
            // The ini is left unread, as the extractor does for skipped entries
            if !entry.path.ends_with(".ini") {
                let mut bytes = Vec::new();
                data.read_to_end(&mut bytes)?;
                read.push(bytes);
            }
            Ok(EntryFlow::Continue)
        })?;
        assert_eq!(seen, 3);
        assert_eq!(read, vec![b"nro bytes".to_vec(), b"readme".to_vec()]);

        // The spool directory is gone; only the archive remains
        let left: Vec<_> = fs::read_dir(dir.path())?.filter_map(|e| e.ok()).map(|e| e.path()).collect();
        assert_eq!(left, vec![path]);
        Ok(())
    }
}
