//! Flat-file mirrors of the feed list.
//!
//! The feed list is the one piece of state that cannot be rebuilt from the
//! network, so every save is mirrored as JSON to each configured path. A
//! fresh database with an empty `feeds` store starts from the first mirror
//! that can be read.

use std::fs;
use std::path::{Path, PathBuf};

use crate::app::Result;
use crate::domain::Feed;

/// Write the feed list to every backup path. Failures are logged, never
/// returned: the store itself already holds the data.
pub fn write_all(paths: &[PathBuf], feeds: &[Feed]) {
    if paths.is_empty() {
        return;
    }

    let json = match serde_json::to_vec_pretty(feeds) {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!("Failed to serialize feed list backup: {}", e);
            return;
        }
    };

    for path in paths {
        if let Err(e) = write_one(path, &json) {
            tracing::warn!("Failed to write feed list backup {}: {}", path.display(), e);
        }
    }
}

fn write_one(path: &Path, json: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// The first non-empty feed list that can be read from the backup paths.
pub fn read_first(paths: &[PathBuf]) -> Option<Vec<Feed>> {
    paths.iter().find_map(|path| match read_one(path) {
        Ok(feeds) if !feeds.is_empty() => Some(feeds),
        Ok(_) => None,
        Err(e) => {
            if path.exists() {
                tracing::warn!("Ignoring unreadable backup {}: {}", path.display(), e);
            }
            None
        }
    })
}

fn read_one(path: &Path) -> Result<Vec<Feed>> {
    let data = fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<Feed> {
        vec![Feed::new_feed("https://example.com/feed.xml", "0")]
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![dir.path().join("one.json"), dir.path().join("nested/two.json")];

        write_all(&paths, &sample());
        assert!(paths[1].exists());
        assert_eq!(read_first(&paths), Some(sample()));
    }

    #[test]
    fn test_corrupt_mirror_falls_through_to_next() {
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![dir.path().join("one.json"), dir.path().join("two.json")];

        write_all(&paths, &sample());
        fs::write(&paths[0], b"{not json").unwrap();

        assert_eq!(read_first(&paths), Some(sample()));
    }

    #[test]
    fn test_missing_mirrors_read_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![dir.path().join("absent.json")];
        assert_eq!(read_first(&paths), None);
    }
}
