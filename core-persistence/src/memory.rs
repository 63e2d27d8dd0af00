use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;

use crate::backend::{PersistenceBackend, PersistenceType, StorageListener};
use crate::error::Result;

/// Process-memory backend. Always available, never migrated to or from, and
/// never shared with another context, so listeners are ignored.
#[derive(Default)]
pub struct InMemoryPersistence {
    storage: Mutex<HashMap<String, Value>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl PersistenceBackend for InMemoryPersistence {
    fn persistence_type(&self) -> PersistenceType {
        PersistenceType::None
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.storage.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.storage.lock().get(key).cloned())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.storage.lock().remove(key);
        Ok(())
    }

    fn add_listener(&self, _key: &str, _listener: StorageListener) {}

    fn remove_listener(&self, _key: &str, _listener: &StorageListener) {}
}
