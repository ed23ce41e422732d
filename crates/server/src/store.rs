//! Lookup of per-machine auth keys.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use crate::ServerError;

/// Read-only source of the auth key each hostname is expected to present.
pub trait MachineStore: Send + Sync {
    fn lookup_auth_key(&self, hostname: &str) -> Option<String>;
}

/// In-memory store, optionally loaded from a JSON object of
/// `hostname -> auth key`.
#[derive(Debug, Default)]
pub struct MemoryMachineStore {
    keys: RwLock<HashMap<String, String>>,
}

impl MemoryMachineStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(keys: HashMap<String, String>) -> Self {
        Self {
            keys: RwLock::new(keys),
        }
    }

    /// Loads keys from a JSON file. A missing file yields an empty store.
    pub fn load(path: &Path) -> Result<Self, ServerError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let data = std::fs::read_to_string(path)?;
        let keys: HashMap<String, String> = serde_json::from_str(&data)
            .map_err(|e| ServerError::Store(format!("{}: {e}", path.display())))?;
        Ok(Self::from_map(keys))
    }

    pub fn insert(&self, hostname: impl Into<String>, auth_key: impl Into<String>) {
        if let Ok(mut keys) = self.keys.write() {
            keys.insert(hostname.into(), auth_key.into());
        }
    }

    pub fn remove(&self, hostname: &str) {
        if let Ok(mut keys) = self.keys.write() {
            keys.remove(hostname);
        }
    }

    pub fn len(&self) -> usize {
        self.keys.read().map(|k| k.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MachineStore for MemoryMachineStore {
    fn lookup_auth_key(&self, hostname: &str) -> Option<String> {
        self.keys.read().ok()?.get(hostname).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_lookup_remove() {
        let store = MemoryMachineStore::new();
        assert!(store.lookup_auth_key("web01").is_none());
        store.insert("web01", "k1");
        assert_eq!(store.lookup_auth_key("web01").as_deref(), Some("k1"));
        store.remove("web01");
        assert!(store.is_empty());
    }

    #[test]
    fn load_from_json_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("machines.json");
        std::fs::write(&path, r#"{"web01":"k1","db01":"k2"}"#).unwrap();

        let store = MemoryMachineStore::load(&path).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.lookup_auth_key("db01").as_deref(), Some("k2"));
    }

    #[test]
    fn missing_file_is_empty_and_garbage_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = MemoryMachineStore::load(&tmp.path().join("nope.json")).unwrap();
        assert!(missing.is_empty());

        let path = tmp.path().join("bad.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            MemoryMachineStore::load(&path),
            Err(ServerError::Store(_))
        ));
    }
}
