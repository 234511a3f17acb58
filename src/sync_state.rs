use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Sync state for incremental export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncState {
    pub last_sync_time: DateTime<Utc>,
    /// Collection -> highest `last_modified` already exported
    pub high_water_marks: HashMap<String, i64>,
}

impl SyncState {
    pub fn new() -> Self {
        Self {
            last_sync_time: Utc::now(),
            high_water_marks: HashMap::new(),
        }
    }

    /// Load sync state from file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read sync state {:?}", path))?;
        let state: SyncState = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse sync state {:?}", path))?;

        Ok(state)
    }

    /// Save sync state to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let content = serde_json::to_string_pretty(&self)?;
        fs::write(path, content)?;

        Ok(())
    }

    /// Timestamp to export from: one past the last exported record.
    pub fn since(&self, collection: &str) -> i64 {
        self.high_water_marks
            .get(collection)
            .map(|mark| mark + 1)
            .unwrap_or(0)
    }

    /// Raise the mark for `collection`. Marks never move backwards.
    pub fn advance(&mut self, collection: &str, last_modified: i64) {
        let mark = self
            .high_water_marks
            .entry(collection.to_string())
            .or_insert(last_modified);
        if last_modified > *mark {
            *mark = last_modified;
        }
        self.last_sync_time = Utc::now();
    }
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_state_exports_everything() {
        let state = SyncState::new();
        assert_eq!(state.since("bookmarks"), 0);
    }

    #[test]
    fn test_advance_never_moves_backwards() {
        let mut state = SyncState::new();
        state.advance("bookmarks", 500);
        state.advance("bookmarks", 200);
        assert_eq!(state.since("bookmarks"), 501);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut state = SyncState::new();
        state.advance("bookmarks", 42);
        state.save(&path).unwrap();

        let loaded = SyncState::load(&path).unwrap();
        assert_eq!(loaded.since("bookmarks"), 43);
    }
}
