//! Free-space queries for the extraction pre-flight check.

use std::path::{Path, PathBuf};
use sysinfo::Disks;

/// Reports free bytes on the volume that holds a path.
pub trait SpaceSource: Send + Sync {
    /// `None` when the volume can't be determined.
    fn free_bytes(&self, path: &Path) -> Option<u64>;
}

/// Queries the mounted disks through sysinfo.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSpace;

impl SpaceSource for SystemSpace {
    fn free_bytes(&self, path: &Path) -> Option<u64> {
        let target = nearest_existing_path(path);
        let target = std::fs::canonicalize(&target).unwrap_or(target);
        let disks = Disks::new_with_refreshed_list();

        // Longest matching mount point wins
        let mut best: Option<(usize, u64)> = None;
        for disk in disks.list() {
            let mount = disk.mount_point();
            if target.starts_with(mount) {
                let score = mount.as_os_str().len();
                match best {
                    Some((best_score, _)) if best_score >= score => {}
                    _ => best = Some((score, disk.available_space())),
                }
            }
        }

        best.map(|(_, available)| available)
    }
}

/// Always reports the same amount. For tests and dry runs.
#[derive(Debug, Clone, Copy)]
pub struct FixedSpace(pub u64);

impl SpaceSource for FixedSpace {
    fn free_bytes(&self, _path: &Path) -> Option<u64> {
        Some(self.0)
    }
}

fn nearest_existing_path(path: &Path) -> PathBuf {
    let mut current = path.to_path_buf();
    while !current.exists() {
        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }
    current
}

/// Bytes needed on disk for `uncompressed` bytes of content, with a 10% margin.
pub fn required_with_margin(uncompressed: u64) -> u64 {
    let padded = (uncompressed as u128) * 11 / 10;
    padded.min(u64::MAX as u128) as u64
}
