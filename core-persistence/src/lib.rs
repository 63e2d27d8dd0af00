//! # Persistence Layer
//!
//! Key/value persistence for auth state across the storage backends a browser
//! offers, with ordered fallback and one-time migration.
//!
//! ## Backends
//!
//! | Backend | Type | Migration | Listeners |
//! |---------|------|-----------|-----------|
//! | [`InMemoryPersistence`] | `NONE` | no | ignored |
//! | [`BrowserSessionPersistence`] | `SESSION` | no | ignored |
//! | [`BrowserLocalPersistence`] | `LOCAL` | yes | native events or polling |
//! | [`DurableStorePersistence`] | `LOCAL` | yes | polling, worker sync |
//!
//! ## Usage
//!
//! ```ignore
//! use core_persistence::{KeyName, PersistenceManager};
//!
//! let manager = PersistenceManager::create(
//!     &[durable, local, session],
//!     &config.api_key,
//!     &config.app_name,
//!     KeyName::AuthUser,
//!     None,
//! )
//! .await?;
//! let user = manager.get_current().await?;
//! ```

pub mod backend;
pub mod browser;
pub mod durable;
pub mod error;
pub mod key;
pub mod manager;
pub mod memory;
pub mod notifier;

#[cfg(test)]
mod test_support;

pub use backend::{same_backend, PersistenceBackend, PersistenceType, StorageListener};
pub use browser::{BrowserLocalPersistence, BrowserSessionPersistence};
pub use durable::{DurableStorePersistence, WorkerContext};
pub use error::{PersistenceError, Result};
pub use key::{persistence_key, KeyName};
pub use manager::PersistenceManager;
pub use memory::InMemoryPersistence;
pub use notifier::{ChangeNotifier, DetectionMode};
