//! In-memory bridge fakes shared by the unit tests of this crate.

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result};
use bridge_traits::storage::{
    ListenerId, ObjectStoreConnection, ObjectStoreFactory, StorageEvent, StorageEventCallback,
    StoredObject, WebStorage,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// `localStorage` stand-in. Writes through the trait never fire events, like
/// the browser, which only notifies other tabs.
#[derive(Default)]
pub struct MemoryWebStorage {
    items: Mutex<HashMap<String, String>>,
    listeners: Mutex<HashMap<u64, StorageEventCallback>>,
    next_id: AtomicU64,
    change_events: bool,
    failing: AtomicBool,
}

impl MemoryWebStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_change_events() -> Arc<Self> {
        Arc::new(Self {
            change_events: true,
            ..Self::default()
        })
    }

    /// Make every operation fail, as with storage disabled by policy.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.items.lock().get(key).cloned()
    }

    /// Another context in the same tab changes the area: no event fires.
    pub fn write_silently(&self, key: &str, value: Option<&str>) {
        let mut items = self.items.lock();
        match value {
            Some(value) => items.insert(key.to_string(), value.to_string()),
            None => items.remove(key),
        };
    }

    /// Another tab changes the area: the change is applied and an event fires.
    pub fn write_from_other_tab(&self, key: &str, value: Option<&str>) {
        let old_value = self.raw(key);
        self.write_silently(key, value);
        self.fire(StorageEvent::new(key, old_value, value.map(str::to_string)));
    }

    pub fn fire(&self, event: StorageEvent) {
        let listeners: Vec<_> = self.listeners.lock().values().cloned().collect();
        for listener in listeners {
            listener(event.clone());
        }
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BridgeError::OperationFailed("SecurityError".to_string()));
        }
        Ok(())
    }
}

impl WebStorage for MemoryWebStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        Ok(self.raw(key))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.check()?;
        self.write_silently(key, Some(value));
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.check()?;
        self.write_silently(key, None);
        Ok(())
    }

    fn supports_change_events(&self) -> bool {
        self.change_events
    }

    fn add_change_listener(&self, callback: StorageEventCallback) -> Result<ListenerId> {
        if !self.change_events {
            return Err(BridgeError::NotAvailable("storage events".to_string()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().insert(id, callback);
        Ok(ListenerId(id))
    }

    fn remove_change_listener(&self, id: ListenerId) {
        self.listeners.lock().remove(&id.0);
    }
}

/// IndexedDB stand-in. All connections share one record map so a second
/// factory handle sees the same database, like a second context would.
#[derive(Default)]
pub struct MemoryObjectStore {
    records: Mutex<BTreeMap<String, Value>>,
    fail_next: AtomicUsize,
    opens: AtomicUsize,
    unsupported: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next `count` transactions.
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    pub fn set_unsupported(&self) {
        self.unsupported.store(true, Ordering::SeqCst);
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn record(&self, key: &str) -> Option<Value> {
        self.records.lock().get(key).cloned()
    }

    /// Another context writes directly to the database.
    pub fn write_externally(&self, key: &str, value: Option<Value>) {
        let mut records = self.records.lock();
        match value {
            Some(value) => records.insert(key.to_string(), value),
            None => records.remove(key),
        };
    }

    fn transaction(&self) -> Result<()> {
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            return Err(BridgeError::DatabaseError("transaction aborted".to_string()));
        }
        Ok(())
    }
}

struct MemoryConnection {
    store: Arc<MemoryObjectStore>,
    closed: AtomicBool,
}

impl MemoryConnection {
    fn check(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BridgeError::DatabaseError("connection closed".to_string()));
        }
        self.store.transaction()
    }
}

#[async_trait]
impl ObjectStoreConnection for MemoryConnection {
    async fn put(&self, key: &str, value: Value) -> Result<()> {
        self.check()?;
        self.store.write_externally(key, Some(value));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.check()?;
        Ok(self.store.record(key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check()?;
        self.store.write_externally(key, None);
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<StoredObject>> {
        self.check()?;
        Ok(self
            .store
            .records
            .lock()
            .iter()
            .map(|(key, value)| StoredObject {
                key: key.clone(),
                value: value.clone(),
            })
            .collect())
    }

    async fn clear(&self) -> Result<()> {
        self.check()?;
        self.store.records.lock().clear();
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Factory handing out connections to one shared [`MemoryObjectStore`].
pub struct MemoryObjectStoreFactory(pub Arc<MemoryObjectStore>);

#[async_trait]
impl ObjectStoreFactory for MemoryObjectStoreFactory {
    fn is_supported(&self) -> bool {
        !self.0.unsupported.load(Ordering::SeqCst)
    }

    async fn open(
        &self,
        _db_name: &str,
        _store_name: &str,
    ) -> Result<Arc<dyn ObjectStoreConnection>> {
        if !self.is_supported() {
            return Err(BridgeError::NotAvailable("indexedDB".to_string()));
        }
        self.0.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemoryConnection {
            store: self.0.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}
