//! # Durable Object Store Backend
//!
//! IndexedDB-backed persistence that survives restarts and is shared with
//! background workers.
//!
//! ## Consistency
//!
//! - A local cache of every value this instance has read, written or polled
//!   is the single source of truth for change detection. `set` and `remove`
//!   update it before returning.
//! - While listeners exist, the store is polled and diffed against the cache.
//!   Polls that complete while a write of this instance is in flight report
//!   nothing, so a half-applied write is never surfaced as an external change.
//! - Every transaction is retried, reopening the database between attempts.
//!
//! ## Worker notification
//!
//! In the main context, writes notify the controlling service worker over the
//! sync channel (`keyChanged`), so the worker refreshes its cache without
//! waiting for its own poll. The notification is advisory: every channel
//! failure is logged and swallowed. Until the background capability ping
//! has settled, writes skip the notification. In a worker context the store
//! answers those notifications instead.

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::messaging::{MessageSource, MessageTarget};
use bridge_traits::storage::{ObjectStoreConnection, ObjectStoreFactory};
use core_channel::{EventHandler, EventType, Receiver, Sender};
use core_runtime::config::Timeouts;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::backend::{ListenerRegistry, PersistenceBackend, PersistenceType, StorageListener};
use crate::error::{PersistenceError, Result};
use crate::key::STORAGE_AVAILABLE_KEY;
use crate::notifier::spawn_poller;

pub const DB_NAME: &str = "firebaseLocalStorageDb";
pub const DB_OBJECTSTORE_NAME: &str = "firebaseLocalStorage";

/// Which side of the worker channel this store instance is on.
#[derive(Clone)]
pub enum WorkerContext {
    /// No cooperating worker.
    None,
    /// Page context; writes are announced to the controlling worker.
    Main(Arc<dyn MessageTarget>),
    /// Worker context; announcements from pages are answered.
    Worker(Arc<dyn MessageSource>),
}

struct DurableInner {
    factory: Arc<dyn ObjectStoreFactory>,
    db: tokio::sync::Mutex<Option<Arc<dyn ObjectStoreConnection>>>,
    retry_count: u32,
    poll_interval: Duration,
    ack_timeout: Duration,
    long_ack_timeout: Duration,
    listeners: Mutex<ListenerRegistry>,
    cache: Mutex<HashMap<String, Option<Value>>>,
    pending_writes: AtomicUsize,
    poller: Mutex<Option<JoinHandle<()>>>,
    context: WorkerContext,
    sender: Option<Sender>,
    receiver: Mutex<Option<Arc<Receiver>>>,
    receiver_available: AtomicBool,
    messaging_started: AtomicBool,
    /// Set once the capability ping settled, whatever its outcome.
    ping: OnceCell<()>,
    this: Weak<DurableInner>,
}

/// Decrements the pending write counter on every exit path.
struct PendingWrite<'a>(&'a AtomicUsize);

impl<'a> PendingWrite<'a> {
    fn begin(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for PendingWrite<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl DurableInner {
    async fn open_db(&self) -> BridgeResult<Arc<dyn ObjectStoreConnection>> {
        let mut db = self.db.lock().await;
        if let Some(conn) = db.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.factory.open(DB_NAME, DB_OBJECTSTORE_NAME).await?;
        *db = Some(conn.clone());
        Ok(conn)
    }

    async fn reset_db(&self) {
        if let Some(conn) = self.db.lock().await.take() {
            conn.close();
        }
    }

    /// Runs `op` against an open connection, reopening and retrying on
    /// failure until the retry budget is spent.
    async fn with_retries<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn(Arc<dyn ObjectStoreConnection>) -> Fut,
        Fut: Future<Output = BridgeResult<T>>,
    {
        let mut attempts: u32 = 0;
        loop {
            let outcome = match self.open_db().await {
                Ok(conn) => op(conn).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if attempts > self.retry_count {
                        warn!(attempts, error = %e, "Object store operation failed");
                        return Err(PersistenceError::Bridge(e));
                    }
                    attempts += 1;
                    debug!(attempts, error = %e, "Retrying object store operation");
                    self.reset_db().await;
                }
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let value = self
            .with_retries(|db| {
                let key = key.to_string();
                async move { db.get(&key).await }
            })
            .await?;
        self.cache.lock().insert(key.to_string(), value.clone());
        Ok(value)
    }

    /// Diffs the store against the cache, notifies listeners of every changed
    /// key and returns those keys.
    #[instrument(skip(self))]
    async fn poll(&self) -> Vec<String> {
        let records = match self.with_retries(|db| async move { db.get_all().await }).await {
            Ok(records) => records,
            Err(e) => {
                debug!(error = %e, "Poll failed");
                return Vec::new();
            }
        };

        if self.pending_writes.load(Ordering::SeqCst) != 0 {
            return Vec::new();
        }

        let mut changes: Vec<(String, Option<Value>)> = Vec::new();
        {
            let cache = self.cache.lock();
            let mut present = HashSet::new();
            for record in records {
                present.insert(record.key.clone());
                if cache.get(&record.key) != Some(&Some(record.value.clone())) {
                    changes.push((record.key, Some(record.value)));
                }
            }
            for (key, cached) in cache.iter() {
                if cached.is_some() && !present.contains(key) {
                    changes.push((key.clone(), None));
                }
            }
        }

        let keys: Vec<String> = changes.iter().map(|(key, _)| key.clone()).collect();
        for (key, value) in changes {
            self.notify_listeners(&key, value);
        }
        keys
    }

    fn notify_listeners(&self, key: &str, value: Option<Value>) {
        self.cache.lock().insert(key.to_string(), value.clone());
        let listeners = self.listeners.lock().listeners_for(key);
        for listener in listeners {
            listener(value.clone());
        }
    }

    fn start_polling(&self) {
        let this = self.this.clone();
        let poller = spawn_poller(self.poll_interval, move || {
            let this = this.clone();
            async move {
                if let Some(inner) = this.upgrade() {
                    inner.poll().await;
                }
            }
        });
        if let Some(previous) = std::mem::replace(&mut *self.poller.lock(), poller) {
            previous.abort();
        }
    }

    fn stop_polling(&self) {
        if let Some(poller) = self.poller.lock().take() {
            poller.abort();
        }
    }

    /// Sets up the messaging role once. The page-side capability ping may
    /// never be answered, so it runs in the background and nothing waits
    /// for it.
    fn start_messaging(&self) {
        if self.messaging_started.swap(true, Ordering::SeqCst) {
            return;
        }
        match &self.context {
            WorkerContext::None => {}
            WorkerContext::Worker(source) => self.initialize_receiver(source.clone()),
            WorkerContext::Main(_) => {
                let Some(inner) = self.this.upgrade() else {
                    return;
                };
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        handle.spawn(async move { inner.ping_worker().await });
                    }
                    Err(_) => warn!("No async runtime available, worker ping skipped"),
                }
            }
        }
    }

    async fn ping_worker(&self) {
        self.ping.get_or_init(|| self.initialize_sender()).await;
    }

    fn initialize_receiver(&self, source: Arc<dyn MessageSource>) {
        let receiver = Receiver::new(source);

        let this = self.this.clone();
        let key_changed: EventHandler = Arc::new(move |_origin: String, data: Value| {
            let this = this.clone();
            async move {
                let Some(inner) = this.upgrade() else {
                    return Err("store dropped".to_string());
                };
                let keys = inner.poll().await;
                let processed = data["key"]
                    .as_str()
                    .map(|key| keys.iter().any(|k| k == key))
                    .unwrap_or(false);
                Ok(json!({ "keyProcessed": processed }))
            }
            .boxed()
        });
        receiver.subscribe(EventType::KeyChanged, key_changed);

        let ping: EventHandler = Arc::new(|_origin, _data| {
            async { Ok(json!([EventType::KeyChanged.as_str()])) }.boxed()
        });
        receiver.subscribe(EventType::Ping, ping);

        *self.receiver.lock() = Some(receiver);
        info!("Durable store answering worker sync messages");
    }

    /// Pings the worker once; a worker that lists `keyChanged` gets the long
    /// ACK timeout from then on.
    async fn initialize_sender(&self) {
        let Some(sender) = self.sender.as_ref() else {
            return;
        };
        match sender
            .send(EventType::Ping, json!({}), self.long_ack_timeout)
            .await
        {
            Ok(results) => {
                let available = results.first().is_some_and(|first| {
                    first.fulfilled
                        && first.value.as_ref().and_then(Value::as_array).is_some_and(
                            |types| types.iter().any(|t| t == EventType::KeyChanged.as_str()),
                        )
                });
                self.receiver_available.store(available, Ordering::SeqCst);
                debug!(available, "Worker capability ping answered");
            }
            Err(e) => debug!(error = %e, "Worker did not answer capability ping"),
        }
    }

    async fn notify_worker(&self, key: &str) {
        self.start_messaging();
        let Some(sender) = self.sender.as_ref() else {
            return;
        };
        if !self.ping.initialized() {
            debug!(key, "Worker ping still in flight, skipping key change notification");
            return;
        }
        if !sender.is_target_active() {
            return;
        }

        let ack_timeout = if self.receiver_available.load(Ordering::SeqCst) {
            self.long_ack_timeout
        } else {
            self.ack_timeout
        };
        if let Err(e) = sender
            .send(EventType::KeyChanged, json!({ "key": key }), ack_timeout)
            .await
        {
            debug!(key, error = %e, "Worker key change notification failed");
        }
    }
}

/// IndexedDB persistence (`LOCAL`, migration allowed).
pub struct DurableStorePersistence {
    inner: Arc<DurableInner>,
}

impl DurableStorePersistence {
    pub fn new(
        factory: Arc<dyn ObjectStoreFactory>,
        context: WorkerContext,
        timeouts: &Timeouts,
    ) -> Self {
        let sender = match &context {
            WorkerContext::Main(target) => Some(Sender::new(target.clone(), timeouts.completion)),
            _ => None,
        };

        let inner = Arc::new_cyclic(|this| DurableInner {
            factory,
            db: tokio::sync::Mutex::new(None),
            retry_count: timeouts.durable_retry_count,
            poll_interval: timeouts.durable_poll_interval,
            ack_timeout: timeouts.ack,
            long_ack_timeout: timeouts.long_ack,
            listeners: Mutex::new(ListenerRegistry::default()),
            cache: Mutex::new(HashMap::new()),
            pending_writes: AtomicUsize::new(0),
            poller: Mutex::new(None),
            context,
            sender,
            receiver: Mutex::new(None),
            receiver_available: AtomicBool::new(false),
            messaging_started: AtomicBool::new(false),
            ping: OnceCell::new(),
            this: this.clone(),
        });
        Self { inner }
    }

    /// Sets up the worker side (subscribe handlers) or the page side (ping the
    /// worker), and waits for the ping to settle. Writes never wait for it.
    pub async fn initialize_messaging(&self) {
        self.inner.start_messaging();
        if matches!(self.inner.context, WorkerContext::Main(_)) {
            self.inner.ping_worker().await;
        }
    }

    /// Whether the controlling worker proved it handles `keyChanged`.
    pub fn is_worker_receiver_available(&self) -> bool {
        self.inner.receiver_available.load(Ordering::SeqCst)
    }

    /// Poll once, returning the keys that changed since the last look.
    pub async fn poll(&self) -> Vec<String> {
        self.inner.poll().await
    }

    /// Delete every record. Listeners are not notified.
    pub async fn clear(&self) -> Result<()> {
        let _pending = PendingWrite::begin(&self.inner.pending_writes);
        self.inner
            .with_retries(|db| async move { db.clear().await })
            .await?;
        self.inner.cache.lock().clear();
        Ok(())
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl PersistenceBackend for DurableStorePersistence {
    fn persistence_type(&self) -> PersistenceType {
        PersistenceType::Local
    }

    fn should_allow_migration(&self) -> bool {
        true
    }

    async fn is_available(&self) -> bool {
        if !self.inner.factory.is_supported() {
            return false;
        }
        self.inner.start_messaging();

        let check = async {
            let db = self.inner.open_db().await?;
            db.put(STORAGE_AVAILABLE_KEY, json!("1")).await?;
            db.delete(STORAGE_AVAILABLE_KEY).await
        };
        match check.await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "Durable store unavailable");
                false
            }
        }
    }

    #[instrument(skip(self, value))]
    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let _pending = PendingWrite::begin(&self.inner.pending_writes);
        self.inner
            .with_retries(|db| {
                let key = key.to_string();
                let value = value.clone();
                async move { db.put(&key, value).await }
            })
            .await?;
        self.inner
            .cache
            .lock()
            .insert(key.to_string(), Some(value));
        self.inner.notify_worker(key).await;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.inner.get(key).await
    }

    #[instrument(skip(self))]
    async fn remove(&self, key: &str) -> Result<()> {
        let _pending = PendingWrite::begin(&self.inner.pending_writes);
        self.inner
            .with_retries(|db| {
                let key = key.to_string();
                async move { db.delete(&key).await }
            })
            .await?;
        self.inner.cache.lock().remove(key);
        self.inner.notify_worker(key).await;
        Ok(())
    }

    fn add_listener(&self, key: &str, listener: StorageListener) {
        let (was_empty, first_for_key) = {
            let mut listeners = self.inner.listeners.lock();
            let was_empty = listeners.is_empty();
            (was_empty, listeners.add(key, listener))
        };

        if was_empty {
            self.inner.start_polling();
        }
        if first_for_key {
            // Prime the cache so the first poll only reports real changes.
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let inner = self.inner.clone();
                let key = key.to_string();
                handle.spawn(async move {
                    if let Err(e) = inner.get(&key).await {
                        debug!(key, error = %e, "Failed to prime durable store cache");
                    }
                });
            }
        }
    }

    fn remove_listener(&self, key: &str, listener: &StorageListener) {
        let now_empty = {
            let mut listeners = self.inner.listeners.lock();
            listeners.remove(key, listener);
            listeners.is_empty()
        };
        if now_empty {
            self.inner.stop_polling();
        }
    }
}

impl Drop for DurableStorePersistence {
    fn drop(&mut self) {
        self.inner.stop_polling();
        if let Some(receiver) = self.inner.receiver.lock().take() {
            receiver.unsubscribe(EventType::KeyChanged, None);
            receiver.unsubscribe(EventType::Ping, None);
        }
    }
}
