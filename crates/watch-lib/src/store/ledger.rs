//! Persistent set of places seen in the previous poll

use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{Result, WatchError};
use crate::models::PlaceId;

/// Plain-text file with one place id per line
#[derive(Debug, Clone)]
pub struct PlaceLedger {
    path: PathBuf,
}

impl PlaceLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the known ids; a missing file means nothing is known yet
    pub fn load(&self) -> Result<BTreeSet<PlaceId>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(WatchError::io(&self.path, e)),
        };

        let mut ids = BTreeSet::new();
        for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match line.parse::<PlaceId>() {
                Ok(id) => {
                    ids.insert(id);
                }
                Err(e) => warn!(error = %e, path = %self.path.display(), "Ignoring ledger entry"),
            }
        }
        Ok(ids)
    }

    /// Replace the ledger contents with `ids`
    ///
    /// Writes a sibling temp file and renames it over the ledger.
    pub fn save<'a>(&self, ids: impl IntoIterator<Item = &'a PlaceId>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| WatchError::io(parent, e))?;
            }
        }

        let sorted: BTreeSet<&PlaceId> = ids.into_iter().collect();
        let tmp = self.temp_path();
        {
            let mut file = fs::File::create(&tmp).map_err(|e| WatchError::io(&tmp, e))?;
            for id in sorted {
                writeln!(file, "{}", id).map_err(|e| WatchError::io(&tmp, e))?;
            }
            file.sync_all().map_err(|e| WatchError::io(&tmp, e))?;
        }
        fs::rename(&tmp, &self.path).map_err(|e| WatchError::io(&self.path, e))?;
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ElementKind;
    use tempfile::TempDir;

    #[test]
    fn test_missing_ledger_is_empty() {
        let dir = TempDir::new().unwrap();
        let ledger = PlaceLedger::new(dir.path().join("seen.txt"));
        assert!(ledger.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let ledger = PlaceLedger::new(dir.path().join("seen.txt"));
        let ids = [
            PlaceId::new(ElementKind::Way, 7),
            PlaceId::new(ElementKind::Node, 42),
        ];

        ledger.save(ids.iter()).unwrap();

        let content = fs::read_to_string(ledger.path()).unwrap();
        assert_eq!(content, "node/42\nway/7\n");
        assert_eq!(ledger.load().unwrap().len(), 2);
        assert!(!dir.path().join("seen.txt.tmp").exists());
    }

    #[test]
    fn test_save_overwrites() {
        let dir = TempDir::new().unwrap();
        let ledger = PlaceLedger::new(dir.path().join("seen.txt"));
        ledger.save([PlaceId::new(ElementKind::Node, 1)].iter()).unwrap();
        ledger.save([PlaceId::new(ElementKind::Node, 2)].iter()).unwrap();

        let ids = ledger.load().unwrap();
        assert_eq!(ids.len(), 1);
        assert!(ids.contains(&PlaceId::new(ElementKind::Node, 2)));
    }

    #[test]
    fn test_load_skips_blank_and_legacy_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seen.txt");
        fs::write(&path, "node/1\n\n123456\n  way/2  \n").unwrap();

        let ids = PlaceLedger::new(&path).load().unwrap();
        assert_eq!(ids.len(), 2);
    }
}
