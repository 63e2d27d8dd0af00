//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host shell.
//!
//! ## Overview
//!
//! This crate defines the contract between the auth coordination core and the
//! browser (or browser-like) environment it runs in. The core never touches
//! `window`, `localStorage`, IndexedDB or `postMessage` directly; each of those
//! is a capability the host injects.
//!
//! ## Traits
//!
//! ### Storage
//! - [`WebStorage`](storage::WebStorage) - Synchronous key/value storage
//!   (tab-durable `localStorage`, session-durable `sessionStorage`) plus the
//!   cross-tab `storage` event.
//! - [`ObjectStoreFactory`](storage::ObjectStoreFactory) /
//!   [`ObjectStoreConnection`](storage::ObjectStoreConnection) - The
//!   transactional embedded object store (IndexedDB) used as the durable backend.
//!
//! ### Cross-Context Messaging
//! - [`MessageTarget`](messaging::MessageTarget) - Posts a message to another
//!   context (e.g. the active service worker) together with a reply port.
//! - [`MessageSource`](messaging::MessageSource) - Delivers inbound messages to
//!   the current context (e.g. the worker global scope).
//!
//! ### Windows
//! - [`PopupWindow`](popup::PopupWindow) - Handle to an opened sign-in popup.
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Wall clock, replaceable by
//!   [`ManualClock`](time::ManualClock) in tests
//! - [`LoggerSink`](logger::LoggerSink) - Receives redacted diagnostics for
//!   the host's own log pipeline
//!
//! ## Fail-Fast Strategy
//!
//! Hosts that cannot provide a capability report it through
//! [`BridgeError::NotAvailable`]. Storage capabilities are checked rather than
//! trusted: the persistence layer converts any check failure into "backend
//! unavailable" and moves on to the next backend in its hierarchy.
//!
//! ## Thread Safety
//!
//! On native targets all bridge traits require `Send + Sync` through
//! [`PlatformSendSync`](platform::PlatformSendSync). On `wasm32` the bound is
//! dropped because browser handles are single-threaded.

pub mod error;
pub mod logger;
pub mod messaging;
pub mod platform;
pub mod popup;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use messaging::{IncomingMessage, MessageHandler, MessageSource, MessageTarget, ReplySink};
pub use logger::{ConsoleLogger, LogEntry, LogLevel, LoggerSink};
pub use platform::PlatformSendSync;
pub use popup::PopupWindow;
pub use storage::{
    ListenerId, ObjectStoreConnection, ObjectStoreFactory, StorageEvent, StorageEventCallback,
    StoredObject, WebStorage,
};
pub use time::{Clock, ManualClock, SystemClock};
