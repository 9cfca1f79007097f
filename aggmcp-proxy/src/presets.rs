//! Preset Store: a small atomic-write backed map of preset name to stored
//! tag query. Loaded eagerly at startup and kept in memory; edits are
//! persisted through the same `FileSystem` abstraction `session.rs` uses,
//! and resolved live at filter time rather than cached on the session (so
//! edits propagate immediately).

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use aggmcp_common::fs_utils::{FilePermissions, FileSystem};
use serde::{Deserialize, Serialize};
use tracing::warn;

const PRESETS_FILE_NAME: &str = "presets.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct PresetsDocument {
    #[serde(flatten)]
    presets: BTreeMap<String, String>,
}

pub struct PresetStore {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
    presets: RwLock<BTreeMap<String, String>>,
}

impl PresetStore {
    pub fn new(fs: Arc<dyn FileSystem>, dir: PathBuf) -> Self {
        Self {
            fs,
            path: dir.join(PRESETS_FILE_NAME),
            presets: RwLock::new(BTreeMap::new()),
        }
    }

    /// Load `presets.json` if present; a missing file is not an error (an
    /// empty store is the starting state for a fresh install).
    pub fn load(&self) -> Result<(), String> {
        if !self.fs.exists(&self.path) {
            return Ok(());
        }
        let contents = self.fs.read_to_string(&self.path).map_err(|e| e.to_string())?;
        let doc: PresetsDocument = match serde_json::from_str(&contents) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(error = %e, "presets.json malformed, starting with an empty preset store");
                return Ok(());
            }
        };
        *self.presets.write().expect("preset store lock poisoned") = doc.presets;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.presets.read().expect("preset store lock poisoned").get(name).cloned()
    }

    pub fn list(&self) -> Vec<(String, String)> {
        self.presets
            .read()
            .expect("preset store lock poisoned")
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn set(&self, name: impl Into<String>, query: impl Into<String>) -> Result<(), String> {
        {
            let mut presets = self.presets.write().expect("preset store lock poisoned");
            presets.insert(name.into(), query.into());
        }
        self.persist()
    }

    pub fn remove(&self, name: &str) -> Result<bool, String> {
        let removed = {
            let mut presets = self.presets.write().expect("preset store lock poisoned");
            presets.remove(name).is_some()
        };
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    fn persist(&self) -> Result<(), String> {
        let doc = PresetsDocument {
            presets: self.presets.read().expect("preset store lock poisoned").clone(),
        };
        let json = serde_json::to_string_pretty(&doc).map_err(|e| e.to_string())?;
        self.fs
            .write_atomic(&self.path, &json, FilePermissions::Standard)
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aggmcp_common::fs_utils::RealFileSystem;
    use tempfile::tempdir;

    fn store() -> (PresetStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        (PresetStore::new(Arc::new(RealFileSystem), dir.path().to_path_buf()), dir)
    }

    #[test]
    fn missing_file_loads_as_empty() {
        let (store, _dir) = store();
        store.load().unwrap();
        assert!(store.list().is_empty());
    }

    #[test]
    fn set_then_get_round_trips() {
        let (store, _dir) = store();
        store.set("ops", "prod AND NOT staging").unwrap();
        assert_eq!(store.get("ops"), Some("prod AND NOT staging".to_string()));
    }

    #[test]
    fn persisted_preset_survives_reload_into_a_new_store() {
        let dir = tempdir().unwrap();
        let fs = Arc::new(RealFileSystem);
        let store = PresetStore::new(fs.clone(), dir.path().to_path_buf());
        store.set("ops", "prod").unwrap();

        let reloaded = PresetStore::new(fs, dir.path().to_path_buf());
        reloaded.load().unwrap();
        assert_eq!(reloaded.get("ops"), Some("prod".to_string()));
    }

    #[test]
    fn remove_reports_whether_it_existed() {
        let (store, _dir) = store();
        store.set("ops", "prod").unwrap();
        assert!(store.remove("ops").unwrap());
        assert!(!store.remove("ops").unwrap());
    }

    #[test]
    fn malformed_file_yields_empty_store_instead_of_an_error() {
        let (store, dir) = store();
        std::fs::write(dir.path().join(PRESETS_FILE_NAME), b"not json").unwrap();
        assert!(store.load().is_ok());
        assert!(store.list().is_empty());
    }
}
