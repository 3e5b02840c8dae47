//! Durable progress ledger for safe resumption.
//!
//! The ledger records which collections have completed a full apply pass.
//! It is injected into the pipeline rather than held as ambient state, so
//! multiple invocations in one process (tests) cannot interfere. Single
//! writer assumed: concurrent jobs against the same file would race.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::info;

use tagrail_shared::{Progress, Result, TagrailError};

/// File name within the data directory.
const PROGRESS_FILE_NAME: &str = "normalize-progress.json";

/// File-backed completion ledger keyed by collection name.
#[derive(Debug, Clone)]
pub struct ProgressStore {
    path: PathBuf,
}

impl ProgressStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(PROGRESS_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the ledger, or start a fresh one when no file exists.
    pub fn load(&self) -> Result<Progress> {
        if !self.path.exists() {
            return Ok(Progress::new());
        }

        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| TagrailError::io(&self.path, e))?;
        serde_json::from_str(&content).map_err(|e| {
            TagrailError::parse(format!("progress file {}: {e}", self.path.display()))
        })
    }

    /// Persist the ledger, stamping `last_updated`.
    pub fn save(&self, progress: &mut Progress) -> Result<()> {
        progress.last_updated = Utc::now();

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TagrailError::io(parent, e))?;
        }

        let content = serde_json::to_string_pretty(progress)
            .map_err(|e| TagrailError::parse(format!("serialize progress: {e}")))?;
        std::fs::write(&self.path, content).map_err(|e| TagrailError::io(&self.path, e))
    }

    /// Discard all prior state. Subsequent loads start fresh.
    pub fn reset(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path).map_err(|e| TagrailError::io(&self.path, e))?;
            info!(path = %self.path.display(), "progress ledger reset");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "tagrail-progress-{name}-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn load_without_file_starts_fresh() {
        let dir = temp_dir("fresh");
        let store = ProgressStore::new(&dir);
        let progress = store.load().unwrap();
        assert!(progress.collections.is_empty());
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = temp_dir("roundtrip");
        let store = ProgressStore::new(&dir);

        let mut progress = Progress::new();
        progress.mark_complete("willow", 42);
        store.save(&mut progress).unwrap();

        let loaded = store.load().unwrap();
        assert!(loaded.is_complete("willow"));
        assert!(!loaded.is_complete("bestbuy"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn reset_discards_all_state() {
        let dir = temp_dir("reset");
        let store = ProgressStore::new(&dir);

        let mut progress = Progress::new();
        progress.mark_complete("willow", 7);
        store.save(&mut progress).unwrap();

        store.reset().unwrap();
        let loaded = store.load().unwrap();
        assert!(loaded.collections.is_empty());

        // Resetting again with no file is a no-op, not an error
        store.reset().unwrap();

        let _ = std::fs::remove_dir_all(&dir);
    }
}
