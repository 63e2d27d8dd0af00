//! # Persistence Backend Contract
//!
//! Every storage backend (in-memory, browser local/session storage, durable
//! object store) implements [`PersistenceBackend`]. Higher layers only ever
//! talk to this trait and treat an unavailable backend as "skip it".

use async_trait::async_trait;
use bridge_traits::platform::PlatformSendSync;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::Result;

/// Listener invoked with the new value of a key (`None` once removed).
pub type StorageListener = Arc<dyn Fn(Option<Value>) + Send + Sync>;

/// How long values of a backend survive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PersistenceType {
    /// Survives restarts and is shared across tabs.
    Local,
    /// Scoped to one tab's lifetime.
    Session,
    /// Process memory only.
    None,
}

impl PersistenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PersistenceType::Local => "LOCAL",
            PersistenceType::Session => "SESSION",
            PersistenceType::None => "NONE",
        }
    }
}

impl fmt::Display for PersistenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniform key/value storage contract.
///
/// Values are opaque JSON blobs. Listener registration is best-effort:
/// backends that are not shared across contexts may ignore it.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait PersistenceBackend: PlatformSendSync {
    fn persistence_type(&self) -> PersistenceType;

    /// Whether values found in this backend may be moved into a more
    /// preferred backend, and whether this backend may receive them.
    fn should_allow_migration(&self) -> bool {
        false
    }

    /// Probe the backend. Never fails: any error means "unavailable".
    async fn is_available(&self) -> bool;

    async fn set(&self, key: &str, value: Value) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn remove(&self, key: &str) -> Result<()>;

    fn add_listener(&self, key: &str, listener: StorageListener);

    fn remove_listener(&self, key: &str, listener: &StorageListener);
}

/// Identity comparison of two backend handles.
pub fn same_backend(a: &Arc<dyn PersistenceBackend>, b: &Arc<dyn PersistenceBackend>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Per-key listener sets shared by the backends that support listeners.
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    listeners: HashMap<String, Vec<StorageListener>>,
}

impl ListenerRegistry {
    /// Adds `listener`; returns `true` when `key` had no listener before.
    pub fn add(&mut self, key: &str, listener: StorageListener) -> bool {
        let set = self.listeners.entry(key.to_string()).or_default();
        let first = set.is_empty();
        set.push(listener);
        first
    }

    pub fn remove(&mut self, key: &str, listener: &StorageListener) {
        if let Some(set) = self.listeners.get_mut(key) {
            set.retain(|l| !Arc::ptr_eq(l, listener));
            if set.is_empty() {
                self.listeners.remove(key);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.listeners.keys().cloned().collect()
    }

    pub fn listeners_for(&self, key: &str) -> Vec<StorageListener> {
        self.listeners.get(key).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> StorageListener {
        Arc::new(|_| {})
    }

    #[test]
    fn test_registry_tracks_first_and_last() {
        let mut registry = ListenerRegistry::default();
        let a = noop();
        let b = noop();

        assert!(registry.add("k", a.clone()));
        assert!(!registry.add("k", b.clone()));
        assert_eq!(registry.listeners_for("k").len(), 2);

        registry.remove("k", &a);
        assert!(!registry.is_empty());
        registry.remove("k", &b);
        assert!(registry.is_empty());
        assert!(registry.listeners_for("k").is_empty());
    }

    #[test]
    fn test_persistence_type_wire_names() {
        assert_eq!(
            serde_json::to_value(PersistenceType::Session).unwrap(),
            serde_json::json!("SESSION")
        );
        assert_eq!(PersistenceType::None.to_string(), "NONE");
    }
}
