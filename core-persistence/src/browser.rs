//! # Browser Web Storage Backends
//!
//! `localStorage` ([`BrowserLocalPersistence`]) and `sessionStorage`
//! ([`BrowserSessionPersistence`]) backends. Values are stored as JSON
//! strings.
//!
//! The local backend is shared by every tab of the profile, so it tracks
//! changes made elsewhere and notifies listeners. Change detection is
//! delegated to a [`ChangeNotifier`]; the backend keeps a snapshot of the raw
//! string last seen for each listened key and only notifies on real changes.
//! Writes and removes made through the backend update that snapshot before
//! returning, so they are never reported back as external changes.

use async_trait::async_trait;
use bridge_traits::storage::{StorageEvent, WebStorage};
use core_runtime::config::AuthConfig;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, warn};

use crate::backend::{ListenerRegistry, PersistenceBackend, PersistenceType, StorageListener};
use crate::error::Result;
use crate::key::STORAGE_AVAILABLE_KEY;
use crate::notifier::{ChangeNotifier, DetectionMode};

/// JSON-over-strings access shared by both web storage backends.
struct WebStorageBase {
    storage: Arc<dyn WebStorage>,
}

impl WebStorageBase {
    fn is_available(&self) -> bool {
        let check = self
            .storage
            .set_item(STORAGE_AVAILABLE_KEY, "1")
            .and_then(|_| self.storage.remove_item(STORAGE_AVAILABLE_KEY));
        match check {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "Web storage unavailable");
                false
            }
        }
    }

    fn set(&self, key: &str, value: &Value) -> Result<String> {
        let raw = serde_json::to_string(value)?;
        self.storage.set_item(key, &raw)?;
        Ok(raw)
    }

    /// The parsed value together with the raw string it was read from.
    fn get(&self, key: &str) -> Result<Option<(Value, String)>> {
        match self.storage.get_item(key)? {
            Some(raw) => Ok(Some((serde_json::from_str(&raw)?, raw))),
            None => Ok(None),
        }
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.storage.remove_item(key)?;
        Ok(())
    }
}

/// `sessionStorage` backend. Not shared across tabs, so listeners are ignored
/// and values are never migrated.
pub struct BrowserSessionPersistence {
    base: WebStorageBase,
}

impl BrowserSessionPersistence {
    pub fn new(storage: Arc<dyn WebStorage>) -> Self {
        Self {
            base: WebStorageBase { storage },
        }
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl PersistenceBackend for BrowserSessionPersistence {
    fn persistence_type(&self) -> PersistenceType {
        PersistenceType::Session
    }

    async fn is_available(&self) -> bool {
        self.base.is_available()
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.base.set(key, &value).map(|_| ())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.base.get(key)?.map(|(value, _)| value))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.base.remove(key)
    }

    fn add_listener(&self, _key: &str, _listener: StorageListener) {}

    fn remove_listener(&self, _key: &str, _listener: &StorageListener) {}
}

struct LocalInner {
    base: WebStorageBase,
    listeners: Mutex<ListenerRegistry>,
    /// Raw string last seen per key.
    snapshot: Mutex<HashMap<String, Option<String>>>,
    notifier: ChangeNotifier,
}

impl LocalInner {
    fn read_raw(&self, key: &str) -> Option<String> {
        match self.base.storage.get_item(key) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, error = %e, "Failed to read web storage");
                None
            }
        }
    }

    fn on_storage_event(&self, event: StorageEvent, from_poll: bool) {
        let Some(key) = event.key else {
            // The area was cleared: report every listened key that changed.
            for (key, value) in self.changed_keys() {
                self.notify(&key, value);
            }
            return;
        };

        if from_poll {
            self.notifier.poll_change_detected();
        } else {
            self.notifier.native_event_received();
        }

        let stored = self.read_raw(&key);
        if !from_poll && self.snapshot.lock().get(&key) == Some(&stored) {
            // Our own write, or already seen by the poller.
            return;
        }
        self.notify(&key, stored);
    }

    fn poll(&self) {
        for (key, value) in self.changed_keys() {
            let old_value = self.snapshot.lock().get(&key).cloned().flatten();
            self.on_storage_event(StorageEvent::new(key, old_value, value), true);
        }
    }

    /// Listened keys whose stored value differs from the snapshot.
    fn changed_keys(&self) -> Vec<(String, Option<String>)> {
        let keys = self.listeners.lock().keys();
        keys.into_iter()
            .filter_map(|key| {
                let stored = self.read_raw(&key);
                let cached = self.snapshot.lock().get(&key).cloned().flatten();
                (stored != cached).then_some((key, stored))
            })
            .collect()
    }

    fn notify(&self, key: &str, raw: Option<String>) {
        self.snapshot.lock().insert(key.to_string(), raw.clone());
        let listeners = self.listeners.lock().listeners_for(key);
        if listeners.is_empty() {
            return;
        }

        let value = match raw.as_deref().map(serde_json::from_str::<Value>).transpose() {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "Ignoring malformed value in web storage");
                return;
            }
        };
        debug!(key, listeners = listeners.len(), "Notifying storage listeners");
        for listener in listeners {
            listener(value.clone());
        }
    }
}

/// `localStorage` backend: shared by every tab, migration allowed, with
/// change detection for listened keys.
pub struct BrowserLocalPersistence {
    inner: Arc<LocalInner>,
}

impl BrowserLocalPersistence {
    /// Creates the backend. `prefer_polling` starts change detection by
    /// polling even when native events are supported, which mobile browsers
    /// need because they deliver storage events unreliably.
    pub fn new(storage: Arc<dyn WebStorage>, poll_interval: Duration, prefer_polling: bool) -> Self {
        let notifier = ChangeNotifier::new(storage.clone(), poll_interval, prefer_polling);
        Self {
            inner: Arc::new(LocalInner {
                base: WebStorageBase { storage },
                listeners: Mutex::new(ListenerRegistry::default()),
                snapshot: Mutex::new(HashMap::new()),
                notifier,
            }),
        }
    }

    pub fn from_config(storage: Arc<dyn WebStorage>, config: &AuthConfig) -> Self {
        Self::new(
            storage,
            config.timeouts.storage_poll_interval,
            config.prefer_storage_polling,
        )
    }

    pub fn detection_mode(&self) -> DetectionMode {
        self.inner.notifier.mode()
    }

    fn start_notifier(&self) {
        let on_event: Weak<LocalInner> = Arc::downgrade(&self.inner);
        let on_tick = on_event.clone();
        self.inner.notifier.start(
            Arc::new(move |event| {
                if let Some(inner) = on_event.upgrade() {
                    inner.on_storage_event(event, false);
                }
            }),
            Arc::new(move || {
                if let Some(inner) = on_tick.upgrade() {
                    inner.poll();
                }
            }),
        );
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl PersistenceBackend for BrowserLocalPersistence {
    fn persistence_type(&self) -> PersistenceType {
        PersistenceType::Local
    }

    fn should_allow_migration(&self) -> bool {
        true
    }

    async fn is_available(&self) -> bool {
        self.inner.base.is_available()
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let raw = self.inner.base.set(key, &value)?;
        self.inner.snapshot.lock().insert(key.to_string(), Some(raw));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let (value, raw) = match self.inner.base.get(key)? {
            Some((value, raw)) => (Some(value), Some(raw)),
            None => (None, None),
        };
        self.inner.snapshot.lock().insert(key.to_string(), raw);
        Ok(value)
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.inner.base.remove(key)?;
        self.inner.snapshot.lock().remove(key);
        Ok(())
    }

    fn add_listener(&self, key: &str, listener: StorageListener) {
        let (was_empty, first_for_key) = {
            let mut listeners = self.inner.listeners.lock();
            let was_empty = listeners.is_empty();
            (was_empty, listeners.add(key, listener))
        };

        if first_for_key {
            let current = self.inner.read_raw(key);
            self.inner.snapshot.lock().insert(key.to_string(), current);
        }
        if was_empty {
            self.start_notifier();
        }
    }

    fn remove_listener(&self, key: &str, listener: &StorageListener) {
        let now_empty = {
            let mut listeners = self.inner.listeners.lock();
            listeners.remove(key, listener);
            listeners.is_empty()
        };
        if now_empty {
            self.inner.notifier.stop();
        }
    }
}
