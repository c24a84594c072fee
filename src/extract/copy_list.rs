//! Post-extraction copy list (`copy_files.txt`).
//!
//! Lines of `source|destination`, both SD-absolute. Files are copied
//! (never moved) after an extraction finishes, overwriting whatever is at
//! the destination.

use crate::paths;

use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyInstruction {
    pub source: String,
    pub destination: String,
}

/// Outcome counts of one copy-list run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyListReport {
    pub copied: usize,
    pub missing: usize,
    pub failed: usize,
    pub invalid: usize,
}

/// Parse the list. Lines without a `|` are counted as invalid.
pub fn parse(text: &str) -> (Vec<CopyInstruction>, usize) {
    let mut instructions = Vec::new();
    let mut invalid = 0;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match line.split_once('|') {
            Some((source, destination)) => instructions.push(CopyInstruction {
                source: source.trim().to_string(),
                destination: destination.trim().to_string(),
            }),
            None => {
                warn!("Invalid copy_files line (expected source|destination): {}", line);
                invalid += 1;
            }
        }
    }

    (instructions, invalid)
}

/// Run the copy list at `list_path`, resolving entries against `root`.
///
/// Never fails as a whole: missing sources and copy errors are logged and
/// counted.
pub fn apply(list_path: &Path, root: &Path) -> CopyListReport {
    let text = match std::fs::read_to_string(list_path) {
        Ok(text) => text,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Could not read copy list {}: {}", list_path.display(), e);
            }
            return CopyListReport::default();
        }
    };

    let (instructions, invalid) = parse(&text);
    let mut report = CopyListReport {
        invalid,
        ..CopyListReport::default()
    };

    for instruction in &instructions {
        let source = paths::join_output(root, &instruction.source);
        let destination = paths::join_output(root, &instruction.destination);

        if !source.is_file() {
            debug!("Copy source missing, skipping: {}", source.display());
            report.missing += 1;
            continue;
        }

        let result = paths::ensure_parent_dirs(&destination)
            .and_then(|_| std::fs::copy(&source, &destination));
        match result {
            Ok(_) => {
                debug!("Copied {} -> {}", source.display(), destination.display());
                report.copied += 1;
            }
            Err(e) => {
                warn!(
                    "Failed to copy {} -> {}: {}",
                    source.display(),
                    destination.display(),
                    e
                );
                report.failed += 1;
            }
        }
    }

    if !instructions.is_empty() {
        info!(
            "Copy list: {} copied, {} missing, {} failed",
            report.copied, report.missing, report.failed
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_parse() {
        let (list, invalid) = parse("# header\n\n/a/b.bin|/c/d.bin\nno-pipe-here\n /x | /y \n");
        assert_eq!(invalid, 1);
        assert_eq!(
            list,
            vec![
                CopyInstruction {
                    source: "/a/b.bin".into(),
                    destination: "/c/d.bin".into()
                },
                CopyInstruction {
                    source: "/x".into(),
                    destination: "/y".into()
                },
            ]
        );
    }

    #[test]
    fn test_apply_copies_and_overwrites() -> Result<()> {
        let dir = tempdir()?;
        let root = dir.path();
        fs::create_dir_all(root.join("bootloader/payloads"))?;
        fs::write(root.join("bootloader/payloads/fusee.bin"), b"new payload")?;
        fs::create_dir_all(root.join("atmosphere"))?;
        fs::write(root.join("atmosphere/reboot_payload.bin"), b"old payload")?;

        let list = root.join("copy_files.txt");
        fs::write(
            &list,
            "/bootloader/payloads/fusee.bin|/atmosphere/reboot_payload.bin\n\
             /bootloader/payloads/fusee.bin|/payloads/nested/fusee.bin\n\
             /missing.bin|/elsewhere.bin\n",
        )?;

        let report = apply(&list, root);
        assert_eq!(report.copied, 2);
        assert_eq!(report.missing, 1);
        assert_eq!(fs::read(root.join("atmosphere/reboot_payload.bin"))?, b"new payload");
        assert_eq!(fs::read(root.join("payloads/nested/fusee.bin"))?, b"new payload");
        // Copy, not move
        assert!(root.join("bootloader/payloads/fusee.bin").exists());
        assert!(!root.join("elsewhere.bin").exists());
        Ok(())
    }

    #[test]
    fn test_absent_list_is_noop() {
        let report = apply(Path::new("/nonexistent/copy_files.txt"), Path::new("/"));
        assert_eq!(report, CopyListReport::default());
    }
}
