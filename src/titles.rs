//! Title-id filtering and discovery.

use crate::paths;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// How deep to look for a title-id folder inside a game's mod folder.
pub const TITLE_SEARCH_DEPTH: usize = 5;

/// Remove excluded titles from `candidates`.
///
/// The exclusion file holds one title-id per line. Exclusions and
/// candidates are trimmed and uppercased before comparison. Returns the
/// remaining ids sorted and uppercased. A missing file excludes nothing.
pub fn exclude_titles(exclusion_file: &Path, candidates: &[String]) -> Vec<String> {
    let excluded: BTreeSet<String> = match std::fs::read_to_string(exclusion_file) {
        Ok(text) => text
            .lines()
            .map(|line| line.trim().to_ascii_uppercase())
            .filter(|line| !line.is_empty())
            .collect(),
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Could not read exclusion list {}: {}", exclusion_file.display(), e);
            }
            BTreeSet::new()
        }
    };

    let candidates: BTreeSet<String> = candidates
        .iter()
        .map(|title| title.trim().to_ascii_uppercase())
        .filter(|title| !title.is_empty())
        .collect();
    let kept: Vec<String> = candidates.into_iter().filter(|title| !excluded.contains(title)).collect();
    debug!("{} titles after exclusions ({} excluded)", kept.len(), excluded.len());
    kept
}

/// Find the first folder named like a title-id below `dir`, up to
/// [`TITLE_SEARCH_DEPTH`] levels down. Returns the id uppercased.
pub fn find_title_id(dir: &Path) -> Option<String> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(TITLE_SEARCH_DEPTH)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .find_map(|e| {
            let name = e.file_name().to_string_lossy();
            paths::is_title_id(&name).then(|| name.to_ascii_uppercase())
        })
}

/// Folder of a title's content under a firmware base (`<base>/contents/<id>`).
pub fn title_contents_dir(cfw_base: &Path, title_id: &str) -> PathBuf {
    cfw_base.join("contents").join(title_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::fs;
    use tempfile::tempdir;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_exclude_titles() -> Result<()> {
        let dir = tempdir()?;
        let exclude = dir.path().join("exclude.txt");
        fs::write(&exclude, "0100000000010000\n  01007ef00011e000  \n\n")?;

        let candidates = ids(&["01007EF00011E000", "0100000000010000", "0100F2C0115B6000"]);
        assert_eq!(exclude_titles(&exclude, &candidates), ids(&["0100F2C0115B6000"]));
        Ok(())
    }

    #[test]
    fn test_lowercase_candidates_are_normalized() -> Result<()> {
        let dir = tempdir()?;
        let exclude = dir.path().join("exclude.txt");
        fs::write(&exclude, "0100000000010000\n")?;

        let candidates = ids(&["0100000000010000", " 0100f2c0115b6000 ", "0100F2C0115B6000"]);
        assert_eq!(exclude_titles(&exclude, &candidates), ids(&["0100F2C0115B6000"]));
        Ok(())
    }

    #[test]
    fn test_missing_exclusion_file_keeps_all_sorted() {
        let candidates = ids(&["B000000000000000", "A000000000000000"]);
        assert_eq!(
            exclude_titles(Path::new("/nonexistent/exclude.txt"), &candidates),
            ids(&["A000000000000000", "B000000000000000"])
        );
    }

    #[test]
    fn test_find_title_id() -> Result<()> {
        let dir = tempdir()?;
        let game = dir.path().join("Zelda");
        fs::create_dir_all(game.join("60fps/contents/01007ef00011e000/exefs"))?;
        assert_eq!(find_title_id(&game), Some("01007EF00011E000".to_string()));

        let other = dir.path().join("NoId");
        fs::create_dir_all(other.join("a/b"))?;
        assert_eq!(find_title_id(&other), None);
        Ok(())
    }

    #[test]
    fn test_find_title_id_depth_limit() -> Result<()> {
        let dir = tempdir()?;
        fs::create_dir_all(dir.path().join("1/2/3/4/5/0100000000010000"))?;
        assert_eq!(find_title_id(dir.path()), None);
        Ok(())
    }

    #[test]
    fn test_title_contents_dir() {
        assert_eq!(
            title_contents_dir(Path::new("/atmosphere"), "0100000000010000"),
            PathBuf::from("/atmosphere/contents/0100000000010000")
        );
    }
}
