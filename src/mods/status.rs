//! Mod verification status and its canonical text form.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

const ACTIVE: &str = "ACTIVE";
const INACTIVE: &str = "INACTIVE";
const UNCHECKED: &str = "UNCHECKED";
const NO_FILE: &str = "NO FILE";
const PARTIAL: &str = "PARTIAL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModStatus {
    #[default]
    Unchecked,
    Active,
    Inactive,
    /// `current` of `total` files match
    Partial { current: usize, total: usize },
    /// The mod folder holds no files
    NoFile,
}

impl ModStatus {
    /// Status for `matched` of `total` files.
    pub fn from_counts(matched: usize, total: usize) -> Self {
        if total == 0 {
            ModStatus::NoFile
        } else if matched == 0 {
            ModStatus::Inactive
        } else if matched == total {
            ModStatus::Active
        } else {
            ModStatus::Partial {
                current: matched,
                total,
            }
        }
    }

    /// Active or partially active: some of the mod's files are installed.
    pub fn is_active(&self) -> bool {
        matches!(self, ModStatus::Active | ModStatus::Partial { .. })
    }

    pub fn is_fully_active(&self) -> bool {
        *self == ModStatus::Active
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, ModStatus::Partial { .. })
    }

    pub fn is_no_file(&self) -> bool {
        *self == ModStatus::NoFile
    }

    /// Human-readable label for listings
    pub fn label(&self) -> String {
        match self {
            ModStatus::Unchecked => "Unchecked".to_string(),
            ModStatus::Active => "Active".to_string(),
            ModStatus::Inactive => "Inactive".to_string(),
            ModStatus::Partial { current, total } => format!("Partial ({}/{})", current, total),
            ModStatus::NoFile => "No files".to_string(),
        }
    }
}

impl fmt::Display for ModStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModStatus::Unchecked => f.write_str(UNCHECKED),
            ModStatus::Active => f.write_str(ACTIVE),
            ModStatus::Inactive => f.write_str(INACTIVE),
            ModStatus::NoFile => f.write_str(NO_FILE),
            ModStatus::Partial { current, total } => write!(f, "{} ({}/{})", PARTIAL, current, total),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown mod status: {0:?}")]
pub struct ParseStatusError(pub String);

impl FromStr for ModStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            ACTIVE => return Ok(ModStatus::Active),
            INACTIVE => return Ok(ModStatus::Inactive),
            UNCHECKED => return Ok(ModStatus::Unchecked),
            NO_FILE => return Ok(ModStatus::NoFile),
            _ => {}
        }

        let rest = s
            .strip_prefix(PARTIAL)
            .ok_or_else(|| ParseStatusError(s.to_string()))?
            .trim();
        // Older caches wrote a bare "PARTIAL"
        if rest.is_empty() {
            return Ok(ModStatus::Partial { current: 0, total: 0 });
        }

        let counts = rest
            .strip_prefix('(')
            .and_then(|r| r.strip_suffix(')'))
            .and_then(|r| r.split_once('/'))
            .and_then(|(c, t)| Some((c.trim().parse::<usize>().ok()?, t.trim().parse::<usize>().ok()?)));
        match counts {
            Some((current, total)) => Ok(ModStatus::Partial { current, total }),
            None => Err(ParseStatusError(s.to_string())),
        }
    }
}

/// One mod folder and its last known state
#[derive(Debug, Clone, PartialEq)]
pub struct ModDescriptor {
    pub name: String,
    pub path: PathBuf,
    pub status: ModStatus,
    /// Share of files installed, 0.0 to 1.0
    pub fraction: f64,
}

impl ModDescriptor {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            status: ModStatus::Unchecked,
            fraction: 0.0,
        }
    }

    pub fn set_status(&mut self, status: ModStatus, fraction: f64) {
        self.status = status;
        self.fraction = fraction.clamp(0.0, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_counts() {
        assert_eq!(ModStatus::from_counts(0, 0), ModStatus::NoFile);
        assert_eq!(ModStatus::from_counts(0, 4), ModStatus::Inactive);
        assert_eq!(ModStatus::from_counts(4, 4), ModStatus::Active);
        assert_eq!(ModStatus::from_counts(1, 4), ModStatus::Partial { current: 1, total: 4 });
    }

    #[test]
    fn test_canonical_text_roundtrip() {
        for status in [
            ModStatus::Unchecked,
            ModStatus::Active,
            ModStatus::Inactive,
            ModStatus::NoFile,
            ModStatus::Partial { current: 2, total: 5 },
        ] {
            assert_eq!(status.to_string().parse::<ModStatus>(), Ok(status));
        }
        assert_eq!(ModStatus::Partial { current: 2, total: 5 }.to_string(), "PARTIAL (2/5)");
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!("active".parse::<ModStatus>().is_err());
        assert!("PARTIAL (x/5)".parse::<ModStatus>().is_err());
        assert_eq!("PARTIAL".parse::<ModStatus>(), Ok(ModStatus::Partial { current: 0, total: 0 }));
    }

    #[test]
    fn test_is_active_and_label() {
        assert!(ModStatus::Active.is_active());
        assert!(ModStatus::Partial { current: 1, total: 2 }.is_active());
        assert!(!ModStatus::Inactive.is_active());
        assert!(!ModStatus::NoFile.is_active());
        assert!(ModStatus::NoFile.is_no_file());
        assert!(ModStatus::Partial { current: 1, total: 2 }.is_partial());
        assert!(!ModStatus::Partial { current: 1, total: 2 }.is_fully_active());
        assert_eq!(ModStatus::Partial { current: 1, total: 2 }.label(), "Partial (1/2)");
    }

    #[test]
    fn test_fraction_is_clamped() {
        let mut m = ModDescriptor::new("a", "/mods/game/a");
        m.set_status(ModStatus::Active, 1.7);
        assert_eq!(m.fraction, 1.0);
    }
}
