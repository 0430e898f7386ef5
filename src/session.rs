//! Session identity: the opaque token that ties this client to server-held dataset state.
//!
//! The identity lives in memory for the process lifetime and in a [`KeyValueStore`] across
//! runs. The server may renegotiate it at any time; the latest server-asserted value wins.

use crate::error::StoreError;
use rand::RngCore;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// Fixed key the identity is persisted under.
pub const SESSION_KEY: &str = "sessionId";

/// Durable client-side storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn clear(&self, key: &str) -> Result<(), StoreError>;
}

/// JSON object on disk, one string value per key.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default location under the platform data directory.
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("analyst-cli")
            .join("session.json")
    }

    fn load(&self) -> Result<BTreeMap<String, String>, StoreError> {
        match std::fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_vec_pretty(entries)?;
        std::fs::write(&self.path, body)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.load().unwrap_or_default();
        entries.insert(key.to_string(), value.to_string());
        self.save(&entries)
    }

    fn clear(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.load().unwrap_or_default();
        if entries.remove(key).is_some() {
            self.save(&entries)?;
        }
        Ok(())
    }
}

/// Process-local store; the identity is forgotten on exit.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
        Ok(())
    }
}

/// Generate a random 128-bit identifier as 32 lowercase hex characters.
fn gen_session_id() -> String {
    let mut b = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut b);
    b.iter().map(|byte| format!("{byte:02x}")).collect()
}

pub struct SessionIdentity {
    store: Box<dyn KeyValueStore>,
    active: Mutex<Option<String>>,
}

impl SessionIdentity {
    pub fn new(store: Box<dyn KeyValueStore>) -> Self {
        Self {
            store,
            active: Mutex::new(None),
        }
    }

    /// Return the active identity, loading it from the store or generating one if needed.
    pub fn resolve(&self) -> String {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(id) = active.as_ref() {
            return id.clone();
        }

        let stored = match self.store.get(SESSION_KEY) {
            Ok(v) => v.filter(|s| !s.trim().is_empty()),
            Err(e) => {
                tracing::warn!("reading stored session id failed: {e}");
                None
            }
        };
        let id = match stored {
            Some(id) => id,
            None => {
                let id = gen_session_id();
                tracing::debug!(session_id = %id, "generated new session id");
                self.persist(&id);
                id
            }
        };
        *active = Some(id.clone());
        id
    }

    /// Adopt a server-asserted identity. Returns the new value when it replaced the active one.
    pub fn reconcile(&self, candidate: &str) -> Option<String> {
        let candidate = candidate.trim();
        if candidate.is_empty() {
            return None;
        }
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if active.as_deref() == Some(candidate) {
            return None;
        }
        tracing::info!(
            previous = active.as_deref().unwrap_or("-"),
            session_id = candidate,
            "server renegotiated session id"
        );
        *active = Some(candidate.to_string());
        self.persist(candidate);
        Some(candidate.to_string())
    }

    /// Forget the current identity so the next `resolve` generates a fresh one.
    pub fn reset(&self) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        *active = None;
        if let Err(e) = self.store.clear(SESSION_KEY) {
            tracing::warn!("clearing stored session id failed: {e}");
        }
    }

    fn persist(&self, id: &str) {
        // The in-memory value stays authoritative for this process if the write fails.
        if let Err(e) = self.store.set(SESSION_KEY, id) {
            tracing::warn!("persisting session id failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Store that shares its contents with the test so writes can be inspected.
    #[derive(Clone, Default)]
    struct SharedStore(Arc<MemoryStore>);

    impl KeyValueStore for SharedStore {
        fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.0.get(key)
        }
        fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
            self.0.set(key, value)
        }
        fn clear(&self, key: &str) -> Result<(), StoreError> {
            self.0.clear(key)
        }
    }

    struct FailingStore;

    impl KeyValueStore for FailingStore {
        fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(std::io::Error::other("disk gone").into())
        }
        fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
            Err(std::io::Error::other("disk gone").into())
        }
        fn clear(&self, _key: &str) -> Result<(), StoreError> {
            Err(std::io::Error::other("disk gone").into())
        }
    }

    #[test]
    fn resolve_generates_and_persists_hex_id() {
        let store = SharedStore::default();
        let session = SessionIdentity::new(Box::new(store.clone()));
        let id = session.resolve();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(store.get(SESSION_KEY).unwrap(), Some(id.clone()));
        assert_eq!(session.resolve(), id);
    }

    #[test]
    fn resolve_prefers_stored_id() {
        let store = SharedStore::default();
        store.set(SESSION_KEY, "stored-id").unwrap();
        let session = SessionIdentity::new(Box::new(store));
        assert_eq!(session.resolve(), "stored-id");
    }

    #[test]
    fn reconcile_ignores_empty_and_identical_candidates() {
        let store = SharedStore::default();
        store.set(SESSION_KEY, "abc").unwrap();
        let session = SessionIdentity::new(Box::new(store.clone()));
        session.resolve();

        assert_eq!(session.reconcile(""), None);
        assert_eq!(session.reconcile("   "), None);
        assert_eq!(session.reconcile("abc"), None);
        assert_eq!(session.resolve(), "abc");
    }

    #[test]
    fn reconcile_replaces_and_persists_new_candidate() {
        let store = SharedStore::default();
        let session = SessionIdentity::new(Box::new(store.clone()));
        let first = session.resolve();

        assert_eq!(session.reconcile("server-id"), Some("server-id".to_string()));
        assert_ne!(first, "server-id");
        assert_eq!(session.resolve(), "server-id");
        assert_eq!(store.get(SESSION_KEY).unwrap(), Some("server-id".into()));
    }

    #[test]
    fn store_failures_leave_memory_authoritative() {
        let session = SessionIdentity::new(Box::new(FailingStore));
        let id = session.resolve();
        assert_eq!(session.resolve(), id);
        assert_eq!(session.reconcile("next"), Some("next".into()));
        assert_eq!(session.resolve(), "next");
    }

    #[test]
    fn reset_forces_a_fresh_identity() {
        let store = SharedStore::default();
        let session = SessionIdentity::new(Box::new(store.clone()));
        let first = session.resolve();
        session.reset();
        assert_eq!(store.get(SESSION_KEY).unwrap(), None);
        let second = session.resolve();
        assert_ne!(first, second);
    }

    #[test]
    fn file_store_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");
        let store = FileStore::new(&path);
        assert_eq!(store.get(SESSION_KEY).unwrap(), None);

        store.set(SESSION_KEY, "abc123").unwrap();
        assert!(path.exists());
        assert_eq!(FileStore::new(&path).get(SESSION_KEY).unwrap(), Some("abc123".into()));

        store.clear(SESSION_KEY).unwrap();
        assert_eq!(store.get(SESSION_KEY).unwrap(), None);
    }
}
