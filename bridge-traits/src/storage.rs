//! Storage Abstractions
//!
//! Provides platform-agnostic traits for the two kinds of browser storage the
//! persistence layer builds on:
//!
//! - [`WebStorage`]: the synchronous string key/value stores (`localStorage`,
//!   `sessionStorage`), including the cross-tab `storage` event.
//! - [`ObjectStoreFactory`] / [`ObjectStoreConnection`]: the transactional
//!   embedded object store (IndexedDB) whose records are `{fbase_key, value}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::{error::Result, platform::PlatformSendSync};

/// A change observed on a [`WebStorage`] area by another browsing context.
///
/// `key` is `None` when the whole storage area was cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEvent {
    pub key: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

impl StorageEvent {
    pub fn new(
        key: impl Into<String>,
        old_value: Option<String>,
        new_value: Option<String>,
    ) -> Self {
        Self {
            key: Some(key.into()),
            old_value,
            new_value,
        }
    }

    /// Event fired when the storage area was cleared.
    pub fn cleared() -> Self {
        Self {
            key: None,
            old_value: None,
            new_value: None,
        }
    }
}

/// Callback invoked for every native storage event.
pub type StorageEventCallback = Arc<dyn Fn(StorageEvent) + Send + Sync>;

/// Handle returned when a native storage listener is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Synchronous key/value storage area.
///
/// Abstracts `window.localStorage` and `window.sessionStorage`. Every method
/// may fail: browsers throw `SecurityError` when storage is disabled by policy
/// and `QuotaExceededError` when it is full. Callers that only need to know
/// whether the area is usable should test it rather than trust it.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::WebStorage;
///
/// fn remember(storage: &dyn WebStorage) -> bridge_traits::error::Result<()> {
///     storage.set_item("firebase:authUser:key:[DEFAULT]", "{\"uid\":\"u1\"}")?;
///     Ok(())
/// }
/// ```
pub trait WebStorage: PlatformSendSync {
    /// Read the raw string stored under `key`.
    fn get_item(&self, key: &str) -> Result<Option<String>>;

    /// Store a raw string under `key`.
    fn set_item(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key` from the storage area.
    fn remove_item(&self, key: &str) -> Result<()>;

    /// Whether this storage area emits native cross-context change events.
    ///
    /// Session-scoped areas and some embedded/mobile environments never do.
    fn supports_change_events(&self) -> bool {
        false
    }

    /// Attach a native change listener.
    ///
    /// Hosts that do not support change events should return
    /// [`BridgeError::NotAvailable`](crate::BridgeError::NotAvailable).
    fn add_change_listener(&self, callback: StorageEventCallback) -> Result<ListenerId>;

    /// Detach a listener previously attached with
    /// [`add_change_listener`](Self::add_change_listener).
    fn remove_change_listener(&self, id: ListenerId);
}

/// A single record of the durable object store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredObject {
    #[serde(rename = "fbase_key")]
    pub key: String,
    pub value: Value,
}

/// Open connection to one object store of the embedded database.
///
/// Each call runs in its own transaction. Implementations must map
/// transaction aborts and connection losses to
/// [`BridgeError::DatabaseError`](crate::BridgeError::DatabaseError) so the
/// caller can reopen and retry.
#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
pub trait ObjectStoreConnection: PlatformSendSync {
    /// Insert or replace the record stored under `key`.
    async fn put(&self, key: &str, value: Value) -> Result<()>;

    /// Fetch the value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Delete the record stored under `key`. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Fetch every record in the store.
    async fn get_all(&self) -> Result<Vec<StoredObject>>;

    /// Delete every record in the store.
    async fn clear(&self) -> Result<()>;

    /// Close the connection. Later calls on this handle fail.
    fn close(&self);
}

/// Opens connections to the embedded database.
///
/// Hosts are responsible for schema upgrades, including recreating the
/// database when the expected object store is missing.
#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
pub trait ObjectStoreFactory: PlatformSendSync {
    /// Whether the environment exposes an embedded database at all.
    fn is_supported(&self) -> bool;

    /// Open `store_name` inside database `db_name`, creating both if needed.
    async fn open(
        &self,
        db_name: &str,
        store_name: &str,
    ) -> Result<Arc<dyn ObjectStoreConnection>>;
}
