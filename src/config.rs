//! SD card layout and user settings
//!
//! `Layout` resolves every well-known location relative to an SD root so
//! the same code runs against a real card mount or a scratch directory.
//! `Settings` is the small JSON file kept next to the other config files.

use crate::paths::{self, CfwVariant};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Title whose mods bypass the contents/<title-id> layout entirely.
pub const SPECIAL_MODS_TITLE_ID: &str = "01006A800016E000";

pub const PRESERVE_FILE: &str = "preserve.txt";
pub const COPY_FILES_FILE: &str = "copy_files.txt";
pub const EXCLUDE_FILE: &str = "exclude.txt";
pub const CHEATS_VERSION_FILE: &str = "cheats_version.dat";
pub const SETTINGS_FILE: &str = "settings.json";
pub const STATUS_CACHE_FILE: &str = "mods_status_cache.txt";
pub const PRESETS_FILE: &str = "mod_presets.conf";

/// Filesystem layout of an SD card
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    /// Mount point of the card (`/` on device)
    pub root: PathBuf,

    /// Where mod files are copied to when applied
    pub install_base: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let install_base = root.join("atmosphere");
        Self { root, install_base }
    }

    /// Apply the install base override from settings, if any
    pub fn with_settings(mut self, settings: &Settings) -> Self {
        if let Some(base) = &settings.install_base {
            self.install_base = self.resolve(base);
        }
        self
    }

    /// Resolve an SD-absolute path such as `/bootloader/update.bin`
    pub fn resolve(&self, sd_path: &str) -> PathBuf {
        paths::join_output(&self.root, sd_path)
    }

    pub fn config_dir(&self) -> PathBuf {
        self.root.join("config").join("SwitchBlade")
    }

    pub fn preserve_list(&self) -> PathBuf {
        self.config_dir().join(PRESERVE_FILE)
    }

    pub fn copy_list(&self) -> PathBuf {
        self.config_dir().join(COPY_FILES_FILE)
    }

    pub fn exclude_list(&self) -> PathBuf {
        self.config_dir().join(EXCLUDE_FILE)
    }

    pub fn cheats_version_file(&self) -> PathBuf {
        self.config_dir().join(CHEATS_VERSION_FILE)
    }

    pub fn settings_file(&self) -> PathBuf {
        self.config_dir().join(SETTINGS_FILE)
    }

    /// Root of the per-game mod folders
    pub fn mods_root(&self) -> PathBuf {
        self.root.join("mods")
    }

    /// Destination for mods of [`SPECIAL_MODS_TITLE_ID`]
    pub fn special_mods_dir(&self) -> PathBuf {
        self.root.join("ultimate").join("mods")
    }

    /// Base folder of a firmware's files (`/atmosphere`, `/sxos`, ...)
    pub fn cfw_dir(&self, cfw: CfwVariant) -> PathBuf {
        self.root.join(cfw.base_dir())
    }

    pub fn bootloader_update(&self) -> PathBuf {
        self.root.join("bootloader").join("update.bin")
    }

    pub fn reboot_payload(&self) -> PathBuf {
        self.root.join("atmosphere").join("reboot_payload.bin")
    }

    /// Validate the layout
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.root.is_dir() {
            return Err(ConfigError::RootNotFound(self.root.clone()));
        }

        if !self.install_base.starts_with(&self.root) {
            return Err(ConfigError::InstallBaseOutsideRoot(self.install_base.clone()));
        }

        Ok(())
    }
}

/// User settings stored in `<config dir>/settings.json`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Firmware the card boots
    #[serde(default)]
    pub cfw: CfwVariant,

    /// Files smaller than this are compared byte for byte
    #[serde(default = "default_full_compare_limit")]
    pub full_compare_limit: u64,

    /// Hash files at or above `full_compare_limit` instead of trusting size
    #[serde(default)]
    pub hash_large_files: bool,

    /// Skip `.ini` entries when extracting firmware packages
    #[serde(default)]
    pub preserve_inis: bool,

    /// SD-absolute override for where mods are applied
    #[serde(default)]
    pub install_base: Option<String>,
}

fn default_full_compare_limit() -> u64 {
    1024 * 1024
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cfw: CfwVariant::default(),
            full_compare_limit: default_full_compare_limit(),
            hash_large_files: false,
            preserve_inis: false,
            install_base: None,
        }
    }
}

impl Settings {
    /// Load settings from `path`, or defaults if the file doesn't exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;

        let settings: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {:?}", path))?;

        Ok(settings)
    }

    /// Save settings to `path`, creating its directory
    pub fn save(&self, path: &Path) -> Result<()> {
        paths::ensure_parent_dirs(path)
            .with_context(|| format!("Failed to create parent of {:?}", path))?;

        let content = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, content).with_context(|| format!("Failed to write {:?}", path))?;

        Ok(())
    }

    /// Directory for the CLI's own state on the host (`~/.config/switchblade`)
    pub fn host_config_dir() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("switchblade");
        Ok(dir)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("SD root not found: {0}")]
    RootNotFound(PathBuf),

    #[error("Install base must live on the SD card: {0}")]
    InstallBaseOutsideRoot(PathBuf),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_layout_paths() {
        let layout = Layout::new("/sd");
        assert_eq!(layout.install_base, PathBuf::from("/sd/atmosphere"));
        assert_eq!(layout.preserve_list(), PathBuf::from("/sd/config/SwitchBlade/preserve.txt"));
        assert_eq!(layout.cfw_dir(CfwVariant::Sxos), PathBuf::from("/sd/sxos"));
        assert_eq!(layout.resolve("/bootloader/update.bin"), PathBuf::from("/sd/bootloader/update.bin"));
        assert_eq!(layout.special_mods_dir(), PathBuf::from("/sd/ultimate/mods"));
    }

    #[test]
    fn test_device_root_resolves_absolute() {
        let layout = Layout::new("/");
        assert_eq!(layout.resolve("/atmosphere/package3"), PathBuf::from("/atmosphere/package3"));
        assert_eq!(layout.mods_root(), PathBuf::from("/mods"));
    }

    #[test]
    fn test_validate() -> Result<()> {
        let dir = tempdir()?;
        let layout = Layout::new(dir.path());
        assert!(layout.validate().is_ok());

        let missing = Layout::new(dir.path().join("nope"));
        assert!(matches!(missing.validate(), Err(ConfigError::RootNotFound(_))));

        let mut outside = Layout::new(dir.path());
        outside.install_base = PathBuf::from("/elsewhere");
        assert!(matches!(outside.validate(), Err(ConfigError::InstallBaseOutsideRoot(_))));
        Ok(())
    }

    #[test]
    fn test_settings_roundtrip_and_defaults() -> Result<()> {
        let dir = tempdir()?;
        let layout = Layout::new(dir.path());
        let path = layout.settings_file();

        assert_eq!(Settings::load(&path)?, Settings::default());

        let settings = Settings {
            cfw: CfwVariant::Sxos,
            hash_large_files: true,
            install_base: Some("/sxos".to_string()),
            ..Settings::default()
        };
        settings.save(&path)?;
        let loaded = Settings::load(&path)?;
        assert_eq!(loaded, settings);

        let layout = layout.with_settings(&loaded);
        assert_eq!(layout.install_base, dir.path().join("sxos"));
        Ok(())
    }

    #[test]
    fn test_partial_settings_fill_defaults() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{ "cfw": "reinx" }"#)?;

        let settings = Settings::load(&path)?;
        assert_eq!(settings.cfw, CfwVariant::ReiNX);
        assert_eq!(settings.full_compare_limit, 1024 * 1024);
        assert!(!settings.hash_large_files);
        Ok(())
    }

    #[test]
    fn test_malformed_settings_is_error() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json")?;
        assert!(Settings::load(&path).is_err());
        Ok(())
    }
}
