//! User preserve list (`preserve.txt`).
//!
//! One path prefix per line. Blank lines and `#` comments are ignored.
//! An entry matching a prefix is not extracted when its destination
//! already exists, so user edits survive package reinstalls.

use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreserveRules {
    prefixes: Vec<String>,
}

fn normalize(path: &str) -> String {
    path.trim().replace('\\', "/").trim_start_matches('/').to_string()
}

impl PreserveRules {
    /// Load from a preserve list. A missing file means no rules.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                let rules = Self::parse(&text);
                debug!("Loaded {} preserve rules from {}", rules.len(), path.display());
                rules
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                warn!("Could not read preserve list {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn parse(text: &str) -> Self {
        let prefixes = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(normalize)
            .filter(|prefix| !prefix.is_empty())
            .collect();
        Self { prefixes }
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    /// True if the raw archive entry path falls under a preserved prefix.
    pub fn matches(&self, entry_path: &str) -> bool {
        let entry = normalize(entry_path);
        self.prefixes.iter().any(|prefix| entry.starts_with(prefix.as_str()))
    }

    /// Skip the entry only if it is preserved and something is already there.
    pub fn should_skip(&self, entry_path: &str, destination: &Path) -> bool {
        !self.prefixes.is_empty() && self.matches(entry_path) && destination.exists()
    }
}
