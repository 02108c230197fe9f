//! Scan configuration.
//!
//! Stored as JSON, e.g. `odbscan.json`:
//!
//! ```json
//! { "git_binary": "/usr/bin/git", "pack_workers": 2, "classifier_workers": 4 }
//! ```
//!
//! Every field is optional; missing fields take their defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Tunables for the storage tool and the scan pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Storage tool executable, looked up on `PATH` when relative
    pub git_binary: PathBuf,
    /// Workers listing pack index contents
    pub pack_workers: usize,
    /// Workers querying object kinds
    pub classifier_workers: usize,
    /// Capacity of each inter-stage channel
    pub channel_capacity: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            git_binary: PathBuf::from("git"),
            pack_workers: 2,
            classifier_workers: 4,
            channel_capacity: 1,
        }
    }
}

impl ScanConfig {
    /// Load from a JSON file, falling back to defaults if it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)
            .map_err(|e| Error::io(format!("Failed to read scan config from {:?}", path), e))?;
        let config: ScanConfig = serde_json::from_str(&data)?;
        Ok(config.normalized())
    }

    /// Copy with every count raised to at least 1
    pub fn normalized(mut self) -> Self {
        self.pack_workers = self.pack_workers.max(1);
        self.classifier_workers = self.classifier_workers.max(1);
        self.channel_capacity = self.channel_capacity.max(1);
        self
    }

    /// Error channel capacity: one slot per stage that can fail.
    ///
    /// The loose walker, the pack locator, each pack worker, and each
    /// classifier send at most one error, so no stage ever blocks reporting.
    pub fn error_capacity(&self) -> usize {
        2 + self.pack_workers + self.classifier_workers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ScanConfig::load(&dir.path().join("odbscan.json")).unwrap();
        assert_eq!(config, ScanConfig::default());
        assert_eq!(config.error_capacity(), 8);
    }

    #[test]
    fn test_partial_file_and_normalization() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("odbscan.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, r#"{{"classifier_workers": 8, "pack_workers": 0}}"#).unwrap();

        let config = ScanConfig::load(&path).unwrap();
        assert_eq!(config.classifier_workers, 8);
        assert_eq!(config.pack_workers, 1);
        assert_eq!(config.git_binary, PathBuf::from("git"));
    }

    #[test]
    fn test_invalid_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("odbscan.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(ScanConfig::load(&path), Err(Error::Config(_))));
    }
}
