//! Archive reading.
//!
//! Every supported container is exposed through [`ArchiveReader`], a
//! sequential "visit each entry with a byte stream" interface. ZIP also
//! implements [`IndexedArchive`] for position-addressed access, which
//! the cheat extractor relies on.
//!
//! Formats are detected by magic bytes, falling back to the extension
//! for tarballs (which have no reliable leading signature).

pub mod rar;
pub mod sevenzip;
pub mod tar;
pub mod zip;

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

pub use self::zip::ZipReader;

/// Metadata of one archive member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Name as stored in the archive (may start with `/`)
    pub path: String,
    /// Uncompressed size in bytes
    pub size: u64,
    pub is_dir: bool,
}

/// What a visitor wants the reader to do after an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryFlow {
    Continue,
    Stop,
}

/// Callback invoked for each entry, in archive order.
pub type EntryVisitor<'a> = dyn FnMut(&ArchiveEntry, &mut dyn Read) -> Result<EntryFlow> + 'a;

/// Sequential reader over an archive's entries.
pub trait ArchiveReader {
    /// Metadata for every entry, without decompressing data.
    fn entries(&mut self) -> Result<Vec<ArchiveEntry>>;

    /// Stream every entry to `visit` in archive order.
    ///
    /// An `Err` from here means the archive itself could not be read. A
    /// visitor that wants to abort for its own reasons returns
    /// `Ok(EntryFlow::Stop)`.
    fn for_each_entry(&mut self, visit: &mut EntryVisitor<'_>) -> Result<()>;
}

/// Random access by entry position.
pub trait IndexedArchive {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry_at(&mut self, index: usize) -> Result<ArchiveEntry>;

    /// Copy the entry's decompressed bytes into `out`.
    fn read_at(&mut self, index: usize, out: &mut dyn Write) -> Result<u64>;
}

/// Archive type detected by magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveType {
    /// ZIP archive (PK signature)
    Zip,
    /// 7z archive (7z signature)
    SevenZ,
    /// RAR archive (Rar! signature)
    Rar,
    /// Uncompressed tarball
    Tar,
    /// Gzip-compressed tarball
    TarGz,
    /// Unknown/unsupported format
    Unknown,
}

/// Detect archive type by reading magic bytes.
pub fn detect_archive_type(path: &Path) -> Result<ArchiveType> {
    let mut file = File::open(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;

    let mut header = [0u8; 512];
    let mut filled = 0;
    while filled < header.len() {
        let n = file
            .read(&mut header[filled..])
            .with_context(|| format!("Failed to read file: {}", path.display()))?;
        if n == 0 {
            break;
        }
        filled += n;
    }

    if filled >= 4 {
        // ZIP: PK\x03\x04 or PK\x05\x06 (empty) or PK\x07\x08 (spanned)
        if header[0..2] == [0x50, 0x4B] {
            return Ok(ArchiveType::Zip);
        }

        // RAR: Rar!\x1A\x07\x00 (RAR4) or Rar!\x1A\x07\x01\x00 (RAR5)
        if header[0..4] == [0x52, 0x61, 0x72, 0x21] {
            return Ok(ArchiveType::Rar);
        }

        // 7z: 7z\xBC\xAF\x27\x1C
        if filled >= 6 && header[0..6] == [0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C] {
            return Ok(ArchiveType::SevenZ);
        }

        // gzip: \x1F\x8B
        if header[0..2] == [0x1F, 0x8B] {
            return Ok(ArchiveType::TarGz);
        }
    }

    // POSIX tar: "ustar" at offset 257
    if filled >= 262 && &header[257..262] == b"ustar" {
        return Ok(ArchiveType::Tar);
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if name.ends_with(".tar") {
        return Ok(ArchiveType::Tar);
    }

    Ok(ArchiveType::Unknown)
}

/// Open an archive with the reader matching its detected type.
pub fn open_archive(path: &Path) -> Result<Box<dyn ArchiveReader>> {
    let reader: Box<dyn ArchiveReader> = match detect_archive_type(path)? {
        ArchiveType::Zip => Box::new(ZipReader::open(path)?),
        ArchiveType::SevenZ => Box::new(sevenzip::SevenZReader::open(path)?),
        ArchiveType::Rar => Box::new(rar::RarReader::open(path)?),
        ArchiveType::Tar => Box::new(tar::TarReader::open(path, false)?),
        ArchiveType::TarGz => Box::new(tar::TarReader::open(path, true)?),
        ArchiveType::Unknown => {
            anyhow::bail!("Unsupported archive format: {}", path.display())
        }
    };
    Ok(reader)
}

/// Copy `reader` into `writer` in `chunk`-sized pieces.
///
/// Read and write failures are reported separately: a read failure means
/// the archive is damaged, a write failure belongs to the destination.
pub fn copy_chunked(
    reader: &mut dyn Read,
    writer: &mut dyn Write,
    chunk: usize,
) -> Result<u64, CopyError> {
    let mut buf = vec![0u8; chunk];
    let mut written = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CopyError::Read(e)),
        };
        writer.write_all(&buf[..n]).map_err(CopyError::Write)?;
        written += n as u64;
    }
    writer.flush().map_err(CopyError::Write)?;
    Ok(written)
}

/// Which side of a chunked copy failed
#[derive(Debug, thiserror::Error)]
pub enum CopyError {
    #[error("read failed: {0}")]
    Read(std::io::Error),

    #[error("write failed: {0}")]
    Write(std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::zip::write::SimpleFileOptions;
    use std::io::Cursor;
    use tempfile::tempdir;

    #[test]
    fn test_detect_zip_and_unknown() -> Result<()> {
        let dir = tempdir()?;
        let zip_path = dir.path().join("pack.bin");
        {
            let file = File::create(&zip_path)?;
            let mut zip = ::zip::ZipWriter::new(file);
            zip.start_file("a.txt", SimpleFileOptions::default())?;
            zip.write_all(b"a")?;
            zip.finish()?;
        }
        assert_eq!(detect_archive_type(&zip_path)?, ArchiveType::Zip);

        let junk = dir.path().join("junk.dat");
        std::fs::write(&junk, b"nothing to see")?;
        assert_eq!(detect_archive_type(&junk)?, ArchiveType::Unknown);
        assert!(open_archive(&junk).is_err());
        Ok(())
    }

    #[test]
    fn test_detect_magic_bytes() -> Result<()> {
        let dir = tempdir()?;
        let cases: [(&str, &[u8], ArchiveType); 3] = [
            ("a.rar", b"Rar!\x1A\x07\x00rest", ArchiveType::Rar),
            ("a.7z", b"7z\xBC\xAF\x27\x1Crest", ArchiveType::SevenZ),
            ("a.tgz", b"\x1F\x8B\x08\x00rest", ArchiveType::TarGz),
        ];
        for (name, bytes, expected) in cases {
            let path = dir.path().join(name);
            std::fs::write(&path, bytes)?;
            assert_eq!(detect_archive_type(&path)?, expected, "{}", name);
        }
        Ok(())
    }

    #[test]
    fn test_copy_chunked_reports_bytes() {
        let mut src = Cursor::new(vec![7u8; 10_000]);
        let mut dst = Vec::new();
        let n = copy_chunked(&mut src, &mut dst, 4096).unwrap();
        assert_eq!(n, 10_000);
        assert_eq!(dst.len(), 10_000);
    }

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("disk full"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_copy_chunked_write_failure_is_write_error() {
        let mut src = Cursor::new(vec![1u8; 16]);
        let err = copy_chunked(&mut src, &mut FailingWriter, 8).unwrap_err();
        assert!(matches!(err, CopyError::Write(_)));
    }
}
