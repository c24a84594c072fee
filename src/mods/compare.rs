//! File equality for reconciliation.
//!
//! Small files are compared byte for byte. At or above the threshold,
//! equal size is taken as equal content unless hashing is switched on.

use crate::config::Settings;
use crate::hash;

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::debug;

const COMPARE_CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileComparator {
    /// Files smaller than this get a full byte comparison
    pub full_compare_limit: u64,
    /// Hash files at or above the limit instead of trusting size
    pub hash_large_files: bool,
}

impl Default for FileComparator {
    fn default() -> Self {
        Self {
            full_compare_limit: 1024 * 1024,
            hash_large_files: false,
        }
    }
}

impl FileComparator {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            full_compare_limit: settings.full_compare_limit,
            hash_large_files: settings.hash_large_files,
        }
    }

    /// True if both files exist and are considered the same.
    pub fn equal(&self, a: &Path, b: &Path) -> bool {
        let (Ok(meta_a), Ok(meta_b)) = (a.metadata(), b.metadata()) else {
            return false;
        };
        if !meta_a.is_file() || !meta_b.is_file() || meta_a.len() != meta_b.len() {
            return false;
        }

        if meta_a.len() < self.full_compare_limit {
            return bytes_equal(a, b).unwrap_or(false);
        }

        if self.hash_large_files {
            return match (hash::file_hash(a), hash::file_hash(b)) {
                (Ok(ha), Ok(hb)) => {
                    if ha != hb {
                        debug!(
                            "Hash mismatch {} ({}) vs {} ({})",
                            a.display(),
                            hash::display_hash(ha),
                            b.display(),
                            hash::display_hash(hb)
                        );
                    }
                    ha == hb
                }
                _ => false,
            };
        }

        true
    }
}

fn bytes_equal(a: &Path, b: &Path) -> std::io::Result<bool> {
    let mut ra = BufReader::new(File::open(a)?);
    let mut rb = BufReader::new(File::open(b)?);
    let mut buf_a = [0u8; COMPARE_CHUNK];
    let mut buf_b = [0u8; COMPARE_CHUNK];

    loop {
        let n = read_full(&mut ra, &mut buf_a)?;
        let m = read_full(&mut rb, &mut buf_b)?;
        if n != m || buf_a[..n] != buf_b[..m] {
            return Ok(false);
        }
        if n == 0 {
            return Ok(true);
        }
    }
}

/// Fill `buf` as far as the reader allows; short only at end of file.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}
