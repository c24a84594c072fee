//! Copying a bootloader payload found during extraction into the places
//! the bootloader and reboot-to-payload look for it.

use crate::config::Layout;
use crate::paths;

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Copy `payload` to `bootloader/update.bin`, and to
/// `atmosphere/reboot_payload.bin` when `also_reboot` is set.
/// Returns the written destinations.
pub fn deploy_payload(layout: &Layout, payload: &Path, also_reboot: bool) -> Result<Vec<PathBuf>> {
    if !payload.is_file() {
        anyhow::bail!("Payload not found: {}", payload.display());
    }

    let mut targets = vec![layout.bootloader_update()];
    if also_reboot {
        targets.push(layout.reboot_payload());
    }

    for target in &targets {
        paths::ensure_parent_dirs(target)
            .with_context(|| format!("Failed to create parent of {}", target.display()))?;
        fs::copy(payload, target)
            .with_context(|| format!("Failed to copy {} to {}", payload.display(), target.display()))?;
        info!("Copied payload to {}", target.display());
    }
    Ok(targets)
}
