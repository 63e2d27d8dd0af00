//! # Ordered Fallback & Migration
//!
//! [`PersistenceManager`] owns one logical key (current user, redirect user,
//! ...) and decides which backend of a preference-ordered hierarchy holds it.
//!
//! ## Selection
//!
//! 1. Probe every backend; unavailable backends are skipped, never fatal.
//! 2. Default to the first available backend (in-memory if none is).
//! 3. Scan the whole hierarchy for an existing value; the first backend that
//!    has one is selected. Read errors count as "not found".
//! 4. If the selected backend allows migration and at least one available
//!    backend does, the first available migration-capable backend becomes the
//!    home of the key: a value found elsewhere is copied into it, and the key
//!    is removed from every other backend.
//!
//! Migration therefore happens once, at creation, never on later reads.

use futures::future::join_all;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::backend::{same_backend, PersistenceBackend, PersistenceType, StorageListener};
use crate::error::Result;
use crate::key::{persistence_key, KeyName};
use crate::memory::InMemoryPersistence;

/// Owner of one persisted key within an ordered backend hierarchy.
pub struct PersistenceManager {
    persistence: RwLock<Arc<dyn PersistenceBackend>>,
    full_key: String,
    full_persistence_key: String,
    listener: Option<StorageListener>,
    migrated: bool,
}

impl PersistenceManager {
    /// Selects the backend for `key_name` and migrates an existing value into
    /// the preferred backend when allowed.
    ///
    /// `listener` is subscribed to the key on the selected backend and moves
    /// with it on [`set_persistence`](Self::set_persistence).
    #[instrument(skip(hierarchy, listener), fields(key = %key_name))]
    pub async fn create(
        hierarchy: &[Arc<dyn PersistenceBackend>],
        api_key: &str,
        app_name: &str,
        key_name: KeyName,
        listener: Option<StorageListener>,
    ) -> Result<Self> {
        let key = persistence_key(key_name, api_key, app_name);

        if hierarchy.is_empty() {
            debug!("Empty persistence hierarchy, using in-memory persistence");
            let fallback: Arc<dyn PersistenceBackend> = Arc::new(InMemoryPersistence::new());
            return Ok(Self::new(fallback, api_key, app_name, key, listener, false));
        }

        let availability = join_all(hierarchy.iter().map(|p| p.is_available())).await;
        let available: Vec<Arc<dyn PersistenceBackend>> = hierarchy
            .iter()
            .zip(availability)
            .filter_map(|(p, ok)| ok.then(|| p.clone()))
            .collect();

        let mut selected: Arc<dyn PersistenceBackend> = match available.first() {
            Some(first) => first.clone(),
            None => {
                warn!("No persistence backend available, using in-memory persistence");
                Arc::new(InMemoryPersistence::new())
            }
        };

        let mut value_to_migrate: Option<Value> = None;
        for persistence in hierarchy {
            match persistence.get(&key).await {
                Ok(Some(value)) => {
                    if !same_backend(persistence, &selected) {
                        value_to_migrate = Some(value);
                    }
                    selected = persistence.clone();
                    break;
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(
                        persistence = %persistence.persistence_type(),
                        error = %e,
                        "Skipping unreadable backend"
                    );
                }
            }
        }

        let migration_hierarchy: Vec<&Arc<dyn PersistenceBackend>> = available
            .iter()
            .filter(|p| p.should_allow_migration())
            .collect();

        let Some(target) = migration_hierarchy.first() else {
            return Ok(Self::new(selected, api_key, app_name, key, listener, false));
        };
        if !selected.should_allow_migration() {
            return Ok(Self::new(selected, api_key, app_name, key, listener, false));
        }

        let selected: Arc<dyn PersistenceBackend> = (*target).clone();
        let migrated = value_to_migrate.is_some();
        if let Some(value) = value_to_migrate {
            selected.set(&key, value).await?;
            info!(
                to = %selected.persistence_type(),
                "Migrated persisted value into preferred backend"
            );
        }

        let removals = hierarchy
            .iter()
            .filter(|p| !same_backend(p, &selected))
            .map(|p| p.remove(&key));
        for outcome in join_all(removals).await {
            if let Err(e) = outcome {
                debug!(error = %e, "Failed to remove migrated key from backend");
            }
        }

        Ok(Self::new(selected, api_key, app_name, key, listener, migrated))
    }

    fn new(
        persistence: Arc<dyn PersistenceBackend>,
        api_key: &str,
        app_name: &str,
        full_key: String,
        listener: Option<StorageListener>,
        migrated: bool,
    ) -> Self {
        if let Some(listener) = &listener {
            persistence.add_listener(&full_key, listener.clone());
        }
        Self {
            persistence: RwLock::new(persistence),
            full_key,
            full_persistence_key: persistence_key(KeyName::Persistence, api_key, app_name),
            listener,
            migrated,
        }
    }

    fn backend(&self) -> Arc<dyn PersistenceBackend> {
        self.persistence.read().clone()
    }

    pub fn full_key(&self) -> &str {
        &self.full_key
    }

    pub fn persistence_type(&self) -> PersistenceType {
        self.persistence.read().persistence_type()
    }

    /// Whether creation copied a value into the preferred backend.
    pub fn migrated(&self) -> bool {
        self.migrated
    }

    pub async fn set_current(&self, value: Value) -> Result<()> {
        self.backend().set(&self.full_key, value).await
    }

    pub async fn get_current(&self) -> Result<Option<Value>> {
        self.backend().get(&self.full_key).await
    }

    pub async fn remove_current(&self) -> Result<()> {
        self.backend().remove(&self.full_key).await
    }

    /// Records the active persistence type so the page the redirect returns
    /// to can restore it.
    pub async fn save_persistence_for_redirect(&self) -> Result<()> {
        let backend = self.backend();
        let persistence_type = serde_json::to_value(backend.persistence_type())?;
        backend.set(&self.full_persistence_key, persistence_type).await
    }

    /// Moves the current value to `new_persistence` and makes it the home of
    /// the key. Returns the previous persistence type, or `None` when
    /// `new_persistence` already is the current backend.
    #[instrument(skip(self, new_persistence), fields(key = %self.full_key))]
    pub async fn set_persistence(
        &self,
        new_persistence: Arc<dyn PersistenceBackend>,
    ) -> Result<Option<PersistenceType>> {
        let current = self.backend();
        if same_backend(&current, &new_persistence) {
            return Ok(None);
        }

        let value = self.get_current().await?;
        self.remove_current().await?;

        if let Some(listener) = &self.listener {
            current.remove_listener(&self.full_key, listener);
            new_persistence.add_listener(&self.full_key, listener.clone());
        }
        *self.persistence.write() = new_persistence.clone();

        if let Some(value) = value {
            new_persistence.set(&self.full_key, value).await?;
        }
        info!(
            from = %current.persistence_type(),
            to = %new_persistence.persistence_type(),
            "Persistence backend changed"
        );
        Ok(Some(current.persistence_type()))
    }

    /// Detaches the key listener.
    pub fn delete(&self) {
        if let Some(listener) = &self.listener {
            self.backend().remove_listener(&self.full_key, listener);
        }
    }
}
