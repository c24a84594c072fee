//! Typed helpers for archive entry paths and SD card layout.
//!
//! Archive entry names arrive as raw strings that may or may not start
//! with `/`, may use `\`, and may carry a `|` disambiguation suffix.
//! Everything that turns such a name into a filesystem location goes
//! through here instead of ad hoc substring arithmetic.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Length of a Switch title-id in hex digits.
pub const TITLE_ID_LEN: usize = 16;

/// Marker that follows the title-id segment in cheat database entries.
const CHEATS_MARKER: &str = "/cheats";

/// Convert `\` separators to `/`. Leading slashes are kept.
pub fn normalize_entry(raw: &str) -> String {
    raw.replace('\\', "/")
}

/// Strip every leading `/` from an entry path.
pub fn strip_root(entry: &str) -> &str {
    entry.trim_start_matches('/')
}

/// Cut an entry name at the first `|`.
///
/// Archive authors use `name|variant` to ship several files that land on
/// the same output path.
pub fn truncate_at_pipe(entry: &str) -> &str {
    match entry.find('|') {
        Some(idx) => &entry[..idx],
        None => entry,
    }
}

/// True if the relative path never climbs out of its root.
pub fn is_contained(relative: &str) -> bool {
    relative.split('/').all(|component| component != "..")
}

/// Join an archive entry onto an output directory.
///
/// An output dir of exactly `/` means "relative to the filesystem root";
/// otherwise the entry's leading slashes are dropped and it is appended.
pub fn join_output(output_dir: &Path, entry: &str) -> PathBuf {
    let relative = strip_root(entry);
    if output_dir == Path::new("/") {
        PathBuf::from(format!("/{}", relative))
    } else {
        output_dir.join(relative)
    }
}

/// Final path component of an entry name.
pub fn file_name(entry: &str) -> &str {
    let trimmed = entry.trim_end_matches('/');
    trimmed
        .rfind('/')
        .map(|idx| &trimmed[idx + 1..])
        .unwrap_or(trimmed)
}

/// `path` relative to `root`, with `/` separators regardless of platform.
pub fn relative_slash_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

/// Create parent directories for a path if they don't exist
pub fn ensure_parent_dirs(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Sixteen hex digits, any case.
pub fn is_title_id(s: &str) -> bool {
    s.len() == TITLE_ID_LEN && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Custom firmware flavour. Decides where per-title content lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CfwVariant {
    #[default]
    Atmosphere,
    #[serde(rename = "reinx")]
    ReiNX,
    Sxos,
}

impl CfwVariant {
    /// Folder (relative to the SD root) that holds this firmware's files.
    pub fn base_dir(self) -> &'static str {
        match self {
            CfwVariant::Atmosphere => "atmosphere",
            CfwVariant::ReiNX => "ReiNX",
            CfwVariant::Sxos => "sxos",
        }
    }

    /// Prefix that precedes the title-id in title-addressed archive paths.
    pub fn titles_prefix(self) -> &'static str {
        match self {
            CfwVariant::Atmosphere | CfwVariant::ReiNX => "contents/",
            CfwVariant::Sxos => "titles/",
        }
    }

    /// Character offset of the title-id inside a cheat entry name.
    pub fn title_offset(self) -> usize {
        self.titles_prefix().len()
    }
}

impl fmt::Display for CfwVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CfwVariant::Atmosphere => "atmosphere",
            CfwVariant::ReiNX => "reinx",
            CfwVariant::Sxos => "sxos",
        };
        f.write_str(name)
    }
}

impl FromStr for CfwVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ams" | "atmosphere" => Ok(CfwVariant::Atmosphere),
            "rnx" | "reinx" => Ok(CfwVariant::ReiNX),
            "sxos" => Ok(CfwVariant::Sxos),
            other => Err(format!("unknown CFW variant: {}", other)),
        }
    }
}

/// Title-id of a `<prefix><title-id>/cheats...` entry, or `None` if the
/// name doesn't have that shape for the given firmware.
///
/// The length is checked before slicing so short or oddly encoded names
/// can never index past the end.
pub fn cheat_title_id(name: &str, cfw: CfwVariant) -> Option<&str> {
    let offset = cfw.title_offset();
    let marker_start = offset + TITLE_ID_LEN;
    let marker_end = marker_start + CHEATS_MARKER.len();
    if name.len() <= marker_end {
        return None;
    }

    let marker = name.get(marker_start..marker_end)?;
    if !marker.eq_ignore_ascii_case(CHEATS_MARKER) {
        return None;
    }
    name.get(offset..marker_start)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_and_strip() {
        assert_eq!(normalize_entry("atmosphere\\contents\\x.bin"), "atmosphere/contents/x.bin");
        assert_eq!(strip_root("//atmosphere/package3"), "atmosphere/package3");
        assert_eq!(strip_root("relative/path"), "relative/path");
    }

    #[test]
    fn test_truncate_at_pipe() {
        assert_eq!(truncate_at_pipe("romfs/ui/file.arc|blue"), "romfs/ui/file.arc");
        assert_eq!(truncate_at_pipe("romfs/ui/file.arc"), "romfs/ui/file.arc");
        assert_eq!(truncate_at_pipe("|"), "");
    }

    #[test]
    fn test_join_output_root_and_relative() {
        assert_eq!(
            join_output(Path::new("/"), "/atmosphere/config.ini"),
            PathBuf::from("/atmosphere/config.ini")
        );
        assert_eq!(
            join_output(Path::new("/"), "atmosphere/config.ini"),
            PathBuf::from("/atmosphere/config.ini")
        );
        assert_eq!(
            join_output(Path::new("/sd"), "/switch/app.nro"),
            PathBuf::from("/sd/switch/app.nro")
        );
        assert_eq!(
            join_output(Path::new("/sd"), "switch/app.nro"),
            PathBuf::from("/sd/switch/app.nro")
        );
    }

    #[test]
    fn test_is_contained() {
        assert!(is_contained("atmosphere/contents/a.bin"));
        assert!(!is_contained("../etc/passwd"));
        assert!(!is_contained("a/../../b"));
        assert!(is_contained("a/..b/c"));
    }

    #[test]
    fn test_file_name() {
        assert_eq!(file_name("bootloader/hekate_ctcaer_6.0.bin"), "hekate_ctcaer_6.0.bin");
        assert_eq!(file_name("payload.bin"), "payload.bin");
        assert_eq!(file_name("switch/dir/"), "dir");
    }

    #[test]
    fn test_is_title_id() {
        assert!(is_title_id("01006A800016E000"));
        assert!(is_title_id("0100abcdef012345"));
        assert!(!is_title_id("01006A800016E00"));
        assert!(!is_title_id("01006A800016E00G"));
    }

    #[test]
    fn test_cfw_offsets() {
        assert_eq!(CfwVariant::Atmosphere.title_offset(), 9);
        assert_eq!(CfwVariant::ReiNX.title_offset(), 9);
        assert_eq!(CfwVariant::Sxos.title_offset(), 7);
        assert_eq!("rnx".parse::<CfwVariant>(), Ok(CfwVariant::ReiNX));
        assert!("horizon".parse::<CfwVariant>().is_err());
    }

    #[test]
    fn test_cheat_title_id_atmosphere() {
        let name = "contents/0100ABCDEF012345/cheats/1234.txt";
        assert_eq!(cheat_title_id(name, CfwVariant::Atmosphere), Some("0100ABCDEF012345"));

        let upper = "contents/0100ABCDEF012345/CHEATS/1234.txt";
        assert_eq!(cheat_title_id(upper, CfwVariant::Atmosphere), Some("0100ABCDEF012345"));

        // Directory entry for the cheats folder itself still qualifies
        let dir = "contents/0100ABCDEF012345/cheats/";
        assert_eq!(cheat_title_id(dir, CfwVariant::Atmosphere), Some("0100ABCDEF012345"));
    }

    #[test]
    fn test_cheat_title_id_sxos() {
        let name = "titles/0100ABCDEF012345/cheats/1234.txt";
        assert_eq!(cheat_title_id(name, CfwVariant::Sxos), Some("0100ABCDEF012345"));
        // Same name read with the wrong offset is rejected
        assert_eq!(cheat_title_id(name, CfwVariant::Atmosphere), None);
    }

    #[test]
    fn test_cheat_title_id_short_names() {
        assert_eq!(cheat_title_id("", CfwVariant::Atmosphere), None);
        assert_eq!(cheat_title_id("contents/", CfwVariant::Atmosphere), None);
        // Exactly offset + 16 + 7 characters is not enough
        assert_eq!(cheat_title_id("contents/0100ABCDEF012345/cheats", CfwVariant::Atmosphere), None);
        assert_eq!(cheat_title_id("contents/0100ABCDEF012345/", CfwVariant::Atmosphere), None);
    }

    #[test]
    fn test_cheat_title_id_multibyte_is_safe() {
        let name = "contents/0100ABCDEF01234é/cheats/x.txt";
        assert_eq!(cheat_title_id(name, CfwVariant::Atmosphere), None);
    }
}
