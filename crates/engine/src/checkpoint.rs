//! Persisted resume checkpoints.
//!
//! A failed download writes the per-file compact checkpoints to a fixed
//! filename in the target directory so a later run can resume each file
//! from its last confirmed offset instead of byte zero. The file is removed
//! after a fully successful batch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::EngineError;

/// Fixed checkpoint filename within the download target directory.
pub const CHECKPOINT_FILE: &str = ".tagstore-checkpoint.json";

/// Mapping from file name to last confirmed resumable offset.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct CheckpointTable {
    offsets: HashMap<String, u64>,
}

impl CheckpointTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the confirmed offset for a file, keeping the maximum.
    pub fn record(&mut self, name: &str, offset: u64) {
        let entry = self.offsets.entry(name.to_string()).or_insert(0);
        *entry = (*entry).max(offset);
    }

    /// Last confirmed offset for `name` (0 if unknown).
    pub fn offset(&self, name: &str) -> u64 {
        self.offsets.get(name).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    fn path_in(dir: &Path) -> PathBuf {
        dir.join(CHECKPOINT_FILE)
    }

    /// Serializes the table into `dir`.
    pub async fn save(&self, dir: &Path) -> Result<(), EngineError> {
        let data = serde_json::to_vec_pretty(self)?;
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(Self::path_in(dir), data).await?;
        debug!(dir = %dir.display(), files = self.offsets.len(), "checkpoint table saved");
        Ok(())
    }

    /// Loads the table from `dir`, `None` if no checkpoint file exists.
    pub async fn load(dir: &Path) -> Result<Option<Self>, EngineError> {
        let path = Self::path_in(dir);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes the checkpoint file if present.
    pub async fn remove(dir: &Path) -> Result<(), EngineError> {
        match tokio::fs::remove_file(Self::path_in(dir)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// True if a checkpoint file exists in `dir`.
    pub fn exists(dir: &Path) -> bool {
        Self::path_in(dir).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_keeps_maximum() {
        let mut t = CheckpointTable::new();
        t.record("a", 100);
        t.record("a", 50);
        assert_eq!(t.offset("a"), 100);
        t.record("a", 200);
        assert_eq!(t.offset("a"), 200);
        assert_eq!(t.offset("unknown"), 0);
    }

    #[tokio::test]
    async fn save_load_remove_roundtrip() {
        let dir = tempfile::tempdir().unwrap();

        assert!(CheckpointTable::load(dir.path()).await.unwrap().is_none());

        let mut t = CheckpointTable::new();
        t.record("data/run1.dat", 4096);
        t.record("b.bin", 128);
        t.save(dir.path()).await.unwrap();
        assert!(CheckpointTable::exists(dir.path()));

        let loaded = CheckpointTable::load(dir.path()).await.unwrap().unwrap();
        assert_eq!(loaded.offset("data/run1.dat"), 4096);
        assert_eq!(loaded.offset("b.bin"), 128);

        CheckpointTable::remove(dir.path()).await.unwrap();
        assert!(!CheckpointTable::exists(dir.path()));
        // Removing twice is fine.
        CheckpointTable::remove(dir.path()).await.unwrap();
    }
}
