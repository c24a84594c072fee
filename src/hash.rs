//! Streaming xxHash64 of files.
//!
//! Used when large files must be compared by content rather than by
//! size alone.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

const HASH_CHUNK: usize = 1024 * 1024;

/// Compute xxHash64 of a file without loading it into memory.
pub fn file_hash(path: &Path) -> Result<u64> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open file for hashing: {}", path.display()))?;

    let mut reader = BufReader::with_capacity(HASH_CHUNK, file);
    let mut buf = vec![0u8; HASH_CHUNK];
    let mut hasher = xxhash_rust::xxh64::Xxh64::new(0);

    loop {
        let bytes_read = reader
            .read(&mut buf)
            .with_context(|| format!("Failed to read file for hashing: {}", path.display()))?;

        if bytes_read == 0 {
            break;
        }

        hasher.update(&buf[..bytes_read]);
    }

    Ok(hasher.digest())
}

/// Short printable form of a hash for log lines.
pub fn display_hash(hash: u64) -> String {
    STANDARD.encode(hash.to_le_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_same_content_same_hash() -> Result<()> {
        let dir = tempdir()?;
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        fs::write(&a, b"romfs payload")?;
        fs::write(&b, b"romfs payload")?;

        assert_eq!(file_hash(&a)?, file_hash(&b)?);
        Ok(())
    }

    #[test]
    fn test_different_content_different_hash() -> Result<()> {
        let dir = tempdir()?;
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        fs::write(&a, vec![0u8; HASH_CHUNK + 7])?;
        let mut other = vec![0u8; HASH_CHUNK + 7];
        other[HASH_CHUNK + 3] = 1;
        fs::write(&b, other)?;

        assert_ne!(file_hash(&a)?, file_hash(&b)?);
        Ok(())
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(file_hash(Path::new("/definitely/not/here.bin")).is_err());
    }

    #[test]
    fn test_display_hash_is_base64() {
        assert_eq!(display_hash(0).len(), 12);
    }
}
