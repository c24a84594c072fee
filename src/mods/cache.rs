//! Per-game status cache (`mods_status_cache.txt`).
//!
//! One line per mod: `default: <name> = <status> = <fraction>`. The file
//! is always rewritten whole. Lines are classified before use so blank,
//! comment and malformed lines are handled in one place.

use super::status::{ModDescriptor, ModStatus};

use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use tracing::{debug, warn};

/// Profile tag written before every entry.
const PROFILE: &str = "default";

const PARTIAL_PREFIX: &str = "PARTIAL";

/// A classified cache line
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLine<'a> {
    Blank,
    Comment,
    Entry {
        name: &'a str,
        status: ModStatus,
        fraction: f64,
    },
    Malformed,
}

/// Classify one line.
///
/// Fields are found by the first `:`, the first `=` after it and the next
/// `=` after that. A missing or unreadable fraction becomes 0.0. Any
/// status starting with `PARTIAL` counts as partial even when its counts
/// don't parse; other unknown statuses make the line malformed.
pub fn classify(line: &str) -> CacheLine<'_> {
    let line = line.trim();
    if line.is_empty() {
        return CacheLine::Blank;
    }
    if line.starts_with('#') {
        return CacheLine::Comment;
    }

    let Some((_, rest)) = line.split_once(':') else {
        return CacheLine::Malformed;
    };
    let Some((name, rest)) = rest.split_once('=') else {
        return CacheLine::Malformed;
    };
    let (status, fraction) = rest.split_once('=').unwrap_or((rest, ""));

    let name = name.trim();
    if name.is_empty() {
        return CacheLine::Malformed;
    }
    let status = match status.trim().parse::<ModStatus>() {
        Ok(status) => status,
        Err(_) if status.trim().starts_with(PARTIAL_PREFIX) => ModStatus::Partial { current: 0, total: 0 },
        Err(_) => return CacheLine::Malformed,
    };
    let fraction = fraction
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .unwrap_or(0.0);

    CacheLine::Entry { name, status, fraction }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatusCache {
    entries: Vec<(String, ModStatus, f64)>,
}

impl StatusCache {
    pub fn parse(text: &str) -> Self {
        let mut entries = Vec::new();
        for (number, line) in text.lines().enumerate() {
            match classify(line) {
                CacheLine::Entry { name, status, fraction } => {
                    entries.push((name.to_string(), status, fraction.clamp(0.0, 1.0)))
                }
                CacheLine::Malformed => debug!("Ignoring malformed cache line {}: {}", number + 1, line),
                CacheLine::Blank | CacheLine::Comment => {}
            }
        }
        Self { entries }
    }

    /// Load the cache, or `None` when the file doesn't exist.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(Some(Self::parse(&text))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read status cache {}", path.display())),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<(ModStatus, f64)> {
        self.entries
            .iter()
            .rev()
            .find(|(n, _, _)| n == name)
            .map(|(_, status, fraction)| (*status, *fraction))
    }

    /// Names recorded as active or partially active, in file order.
    pub fn active_mods(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, status, _)| status.is_active())
            .map(|(name, _, _)| name.clone())
            .collect()
    }

    /// Overlay cached statuses onto `mods`. Entries for unknown mods are ignored.
    pub fn apply_to(&self, mods: &mut [ModDescriptor]) {
        for m in mods.iter_mut() {
            if let Some((status, fraction)) = self.get(&m.name) {
                m.set_status(status, fraction);
            }
        }
    }

    /// Rewrite the cache at `path` from `mods`.
    pub fn save(path: &Path, mods: &[ModDescriptor]) -> Result<()> {
        let dir = path
            .parent()
            .with_context(|| format!("Status cache has no parent directory: {}", path.display()))?;
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

        let mut file = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
        for m in mods {
            writeln!(file, "{}: {} = {} = {:.6}", PROFILE, m.name, m.status, m.fraction)
                .context("Failed to write status cache")?;
        }
        file.persist(path)
            .with_context(|| format!("Failed to write status cache {}", path.display()))?;
        Ok(())
    }
}

/// Fill in `mods` from the cache at `path`.
///
/// Without a cache file every mod is INACTIVE.
pub fn load_statuses(path: &Path, mods: &mut [ModDescriptor]) -> Result<()> {
    match StatusCache::load(path)? {
        Some(cache) => cache.apply_to(mods),
        None => {
            for m in mods.iter_mut() {
                m.set_status(ModStatus::Inactive, 0.0);
            }
        }
    }
    Ok(())
}

/// Delete the cache file; a missing file is fine.
pub fn clear(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed status cache {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove status cache {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_classify() {
        assert_eq!(classify("   "), CacheLine::Blank);
        assert_eq!(classify("# header"), CacheLine::Comment);
        assert_eq!(
            classify("default: 60 FPS = ACTIVE = 1.000000"),
            CacheLine::Entry {
                name: "60 FPS",
                status: ModStatus::Active,
                fraction: 1.0
            }
        );
        assert_eq!(
            classify("default: Font = PARTIAL (2/3) = 0.666667"),
            CacheLine::Entry {
                name: "Font",
                status: ModStatus::Partial { current: 2, total: 3 },
                fraction: 0.666667
            }
        );
        assert_eq!(classify("default: no separators"), CacheLine::Malformed);
        assert_eq!(classify("no colon = ACTIVE = 1"), CacheLine::Malformed);
        assert_eq!(classify("default: x = WHATEVER = 1"), CacheLine::Malformed);
    }

    #[test]
    fn test_missing_fraction_and_odd_partial() {
        assert_eq!(
            classify("default: Old = ACTIVE"),
            CacheLine::Entry {
                name: "Old",
                status: ModStatus::Active,
                fraction: 0.0
            }
        );
        assert_eq!(
            classify("default: Font = PARTIAL (x/5) = 0.4"),
            CacheLine::Entry {
                name: "Font",
                status: ModStatus::Partial { current: 0, total: 0 },
                fraction: 0.4
            }
        );

        let cache = StatusCache::parse("default: Old = ACTIVE\ndefault: Font = PARTIAL?\n");
        assert_eq!(cache.active_mods(), vec!["Old".to_string(), "Font".to_string()]);
    }

    #[test]
    fn test_bad_fraction_defaults_to_zero() {
        assert_eq!(
            classify("default: HUD = INACTIVE = abc"),
            CacheLine::Entry {
                name: "HUD",
                status: ModStatus::Inactive,
                fraction: 0.0
            }
        );
    }

    #[test]
    fn test_save_load_roundtrip() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("mods_status_cache.txt");

        let mut a = ModDescriptor::new("A", dir.path().join("A"));
        a.set_status(ModStatus::Active, 1.0);
        let mut b = ModDescriptor::new("B", dir.path().join("B"));
        b.set_status(ModStatus::Partial { current: 1, total: 4 }, 0.25);
        StatusCache::save(&path, &[a, b])?;

        let text = std::fs::read_to_string(&path)?;
        assert!(text.starts_with("default: A = ACTIVE = 1.000000\n"));

        let cache = StatusCache::load(&path)?.expect("cache exists");
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("B"), Some((ModStatus::Partial { current: 1, total: 4 }, 0.25)));
        assert_eq!(cache.active_mods(), vec!["A".to_string(), "B".to_string()]);
        Ok(())
    }

    #[test]
    fn test_missing_cache_means_inactive() -> Result<()> {
        let dir = tempdir()?;
        let mut mods = vec![ModDescriptor::new("A", dir.path().join("A"))];
        load_statuses(&dir.path().join("missing.txt"), &mut mods)?;
        assert_eq!(mods[0].status, ModStatus::Inactive);
        Ok(())
    }

    #[test]
    fn test_unknown_and_uncached_mods() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("cache.txt");
        std::fs::write(&path, "default: Gone = ACTIVE = 1.0\ngarbage line\ndefault: A = ACTIVE = 1.0\n")?;

        let mut mods = vec![
            ModDescriptor::new("A", dir.path().join("A")),
            ModDescriptor::new("New", dir.path().join("New")),
        ];
        load_statuses(&path, &mut mods)?;
        assert_eq!(mods[0].status, ModStatus::Active);
        assert_eq!(mods[1].status, ModStatus::Unchecked);
        Ok(())
    }
}
