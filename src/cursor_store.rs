//! Persisted per-channel thread cursors for single-user mode.
//!
//! One map `channel key -> thread ts` lives under [`CURSOR_KEY`] in a small
//! JSON key-value file. The map is always written wholesale.

use crate::error::StoreError;
use crate::message::Channel;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Channel key (name or id) to the root `ts` of the visitor's thread.
pub type CursorMap = BTreeMap<String, String>;

/// Namespaced key the cursor map is stored under.
pub const CURSOR_KEY: &str = "slackchat.channel_ts_map";

pub trait CursorStore: Send + Sync {
    /// Every persisted cursor, unfiltered.
    fn read_all(&self) -> Result<CursorMap, StoreError>;

    /// Replace the persisted map with `map`. Callers pass the full map.
    fn save(&self, map: &CursorMap) -> Result<(), StoreError>;

    /// Persisted cursors for the given channels; entries for channels no
    /// longer configured are dropped.
    fn load(&self, channels: &[Channel]) -> Result<CursorMap, StoreError> {
        Ok(retain_configured(self.read_all()?, channels))
    }
}

pub fn retain_configured(map: CursorMap, channels: &[Channel]) -> CursorMap {
    map.into_iter()
        .filter(|(key, _)| channels.iter().any(|c| c.matches(key)))
        .collect()
}

/// Default location of the state file in the platform data directory.
pub fn default_state_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "slackchat", "slackchat")
        .map(|dirs| dirs.data_dir().join("state.json"))
}

// ── File-backed store ────────────────────────────────────────────────────────

pub struct FileCursorStore {
    path: PathBuf,
}

impl FileCursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }

    fn read_document(&self) -> Result<serde_json::Map<String, serde_json::Value>, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) if raw.trim().is_empty() => Ok(serde_json::Map::new()),
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(serde_json::Map::new()),
            Err(e) => Err(self.io_err(e)),
        }
    }
}

impl CursorStore for FileCursorStore {
    fn read_all(&self) -> Result<CursorMap, StoreError> {
        let mut doc = self.read_document()?;
        match doc.remove(CURSOR_KEY) {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(CursorMap::new()),
        }
    }

    fn save(&self, map: &CursorMap) -> Result<(), StoreError> {
        let mut doc = self.read_document().unwrap_or_else(|e| {
            tracing::warn!(path = %self.path.display(), "cursor store unreadable, rewriting: {e}");
            serde_json::Map::new()
        });
        doc.insert(CURSOR_KEY.to_string(), serde_json::to_value(map)?);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(&doc)?;
        std::fs::write(&tmp, body).map_err(|e| self.io_err(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))?;
        tracing::debug!(path = %self.path.display(), entries = map.len(), "cursor map saved");
        Ok(())
    }
}

// ── In-memory store ──────────────────────────────────────────────────────────

/// Store that forgets everything on restart. Used when no state path is usable.
#[derive(Default)]
pub struct MemoryCursorStore {
    map: RwLock<CursorMap>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(map: CursorMap) -> Self {
        Self {
            map: RwLock::new(map),
        }
    }
}

impl CursorStore for MemoryCursorStore {
    fn read_all(&self) -> Result<CursorMap, StoreError> {
        Ok(self.map.read().clone())
    }

    fn save(&self, map: &CursorMap) -> Result<(), StoreError> {
        *self.map.write() = map.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channels() -> Vec<Channel> {
        vec![Channel::new("C1", "general"), Channel::new("C2", "")]
    }

    fn map(entries: &[(&str, &str)]) -> CursorMap {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn load_drops_entries_for_removed_channels() {
        let store = MemoryCursorStore::with_entries(map(&[
            ("general", "100.1"),
            ("C2", "200.2"),
            ("retired", "300.3"),
        ]));
        let loaded = store.load(&channels()).unwrap();
        assert_eq!(loaded, map(&[("general", "100.1"), ("C2", "200.2")]));
    }

    #[test]
    fn save_overwrites_wholesale() {
        let store = MemoryCursorStore::with_entries(map(&[("general", "1.0"), ("C2", "2.0")]));
        store.save(&map(&[("general", "9.0")])).unwrap();
        assert_eq!(store.read_all().unwrap(), map(&[("general", "9.0")]));
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCursorStore::new(dir.path().join("nope.json"));
        assert!(store.read_all().unwrap().is_empty());
    }

    #[test]
    fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        FileCursorStore::new(&path)
            .save(&map(&[("general", "100.000200")]))
            .unwrap();

        let reopened = FileCursorStore::new(&path);
        assert_eq!(
            reopened.load(&channels()).unwrap(),
            map(&[("general", "100.000200")])
        );
    }

    #[test]
    fn file_store_keeps_unrelated_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, r#"{"other.widget": {"x": 1}}"#).unwrap();

        let store = FileCursorStore::new(&path);
        store.save(&map(&[("general", "1.0")])).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["other.widget"]["x"], 1);
        assert_eq!(raw[CURSOR_KEY]["general"], "1.0");
    }

    #[test]
    fn corrupt_file_is_reported_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = FileCursorStore::new(&path);
        assert!(matches!(store.read_all(), Err(StoreError::Json(_))));

        store.save(&map(&[("general", "1.0")])).unwrap();
        assert_eq!(store.read_all().unwrap(), map(&[("general", "1.0")]));
    }
}
