//! # Auth Session
//!
//! [`AuthSession`] is the concrete [`AuthHandle`]: it owns the persisted
//! current user and redirect user and restores them on start-up.
//!
//! ## Bootstrap
//!
//! [`AuthSession::initialize`] selects the backend for the current user
//! (ordered fallback with migration), then:
//!
//! 1. When popup/redirect flows are configured, reads any pending redirect
//!    result without touching the session (`bypass_auth_state`) and adopts
//!    its user when it belongs to this session.
//! 2. A user stamped with a redirect event id that matches the persisted
//!    redirect user is adopted as-is.
//! 3. Any other user is reloaded. A `network-request-failed` reload keeps the
//!    cached user; any other reload error evicts it.
//!
//! Mutations of the current user are serialised through an internal queue.
//! Bootstrap itself runs inside that queue.

use async_trait::async_trait;
use core_persistence::{
    KeyName, PersistenceBackend, PersistenceManager, PersistenceType, StorageListener,
};
use core_runtime::config::AuthConfig;
use core_runtime::events::{AuthStateEvent, CoreEvent, EventBus, PersistenceEvent};
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::{Arc, Weak};
use tokio::sync::{watch, Mutex, OnceCell};
use tracing::{debug, info, instrument, warn};

use crate::error::{AuthError, Result};
use crate::flows::AuthFlowManager;
use crate::handle::AuthHandle;
use crate::idp::IdpClient;
use crate::operation::spawn_task;
use crate::resolver::PopupRedirectResolver;
use crate::types::{User, UserCredential};

fn parse_user(value: Option<Value>) -> Option<User> {
    let value = value?;
    match serde_json::from_value(value) {
        Ok(user) => Some(user),
        Err(error) => {
            warn!(%error, "Ignoring malformed persisted user");
            None
        }
    }
}

pub struct AuthSession {
    config: AuthConfig,
    idp: Arc<dyn IdpClient>,
    event_bus: EventBus,
    persistence: OnceCell<PersistenceManager>,
    redirect_persistence: OnceCell<PersistenceManager>,
    resolver: RwLock<Option<Arc<dyn PopupRedirectResolver>>>,
    current_user: RwLock<Option<User>>,
    redirect_user: RwLock<Option<User>>,
    queue: Mutex<()>,
    initialized: watch::Sender<bool>,
    this: Weak<AuthSession>,
}

impl AuthSession {
    pub fn new(config: AuthConfig, idp: Arc<dyn IdpClient>, event_bus: EventBus) -> Arc<Self> {
        let (initialized, _) = watch::channel(false);
        Arc::new_cyclic(|this| Self {
            config,
            idp,
            event_bus,
            persistence: OnceCell::new(),
            redirect_persistence: OnceCell::new(),
            resolver: RwLock::new(None),
            current_user: RwLock::new(None),
            redirect_user: RwLock::new(None),
            queue: Mutex::new(()),
            initialized,
            this: this.clone(),
        })
    }

    pub fn is_initialized(&self) -> bool {
        *self.initialized.borrow()
    }

    /// Restores the session from `hierarchy`, most preferred backend first.
    #[instrument(skip(self, hierarchy, flows), fields(auth_key = %self.key()))]
    pub async fn initialize(
        &self,
        hierarchy: &[Arc<dyn PersistenceBackend>],
        flows: Option<&AuthFlowManager>,
    ) -> Result<()> {
        let _queue = self.queue.lock().await;
        if self.persistence.initialized() {
            return Err(AuthError::internal("auth session initialized twice"));
        }

        let manager = PersistenceManager::create(
            hierarchy,
            &self.config.api_key,
            &self.config.app_name,
            KeyName::AuthUser,
            Some(self.storage_listener()),
        )
        .await?;
        if manager.migrated() {
            self.emit(CoreEvent::Persistence(PersistenceEvent::Migrated {
                key: manager.full_key().to_string(),
                to: manager.persistence_type().to_string(),
            }));
        }
        if self.persistence.set(manager).is_err() {
            return Err(AuthError::internal("auth session initialized twice"));
        }

        if let Some(flows) = flows {
            *self.resolver.write() = Some(flows.resolver());
        }
        self.initialize_current_user(flows).await?;

        self.initialized.send_replace(true);
        info!(uid = ?self.current_user().map(|u| u.uid), "Auth session initialized");
        Ok(())
    }

    async fn initialize_current_user(&self, flows: Option<&AuthFlowManager>) -> Result<()> {
        let mut future_user = parse_user(self.user_persistence()?.get_current().await?);

        if let Some(flows) = flows.filter(|_| self.config.auth_domain.is_some()) {
            self.redirect_manager().await?;
            let redirect_event_id = self
                .redirect_user
                .read()
                .as_ref()
                .and_then(|user| user.redirect_event_id.clone());
            let stored_event_id = future_user
                .as_ref()
                .and_then(|user| user.redirect_event_id.clone());

            let result = self.try_redirect_sign_in(flows).await;
            if redirect_event_id.is_none() || redirect_event_id == stored_event_id {
                if let Some(credential) = result {
                    debug!(uid = %credential.user.uid, "Adopting user from redirect result");
                    future_user = Some(credential.user);
                }
            }
        }

        let Some(user) = future_user else {
            return self.directly_set_current_user(None).await;
        };
        let Some(event_id) = user.redirect_event_id.clone() else {
            return self.reload_and_set_current_user_or_clear(user).await;
        };

        self.redirect_manager().await?;
        let matches_redirect_user = self
            .redirect_user
            .read()
            .as_ref()
            .is_some_and(|redirect| redirect.redirect_event_id.as_deref() == Some(event_id.as_str()));
        if matches_redirect_user {
            return self.directly_set_current_user(Some(user)).await;
        }
        self.reload_and_set_current_user_or_clear(user).await
    }

    async fn try_redirect_sign_in(&self, flows: &AuthFlowManager) -> Option<UserCredential> {
        match flows.get_redirect_result_internal(true).await {
            Ok(result) => result,
            Err(error) => {
                debug!(code = %error.code(), "Redirect sign-in during bootstrap failed");
                if let Err(error) = self.set_redirect_user(None).await {
                    warn!(%error, "Failed to clear redirect user");
                }
                None
            }
        }
    }

    async fn reload_and_set_current_user_or_clear(&self, user: User) -> Result<()> {
        match self.idp.reload_user(user.clone()).await {
            Ok(reloaded) => self.directly_set_current_user(Some(reloaded)).await,
            Err(error) if error.is_network_error() => {
                debug!(uid = %user.uid, "Offline during bootstrap, keeping cached user");
                self.directly_set_current_user(Some(user)).await
            }
            Err(error) => {
                warn!(uid = %user.uid, code = %error.full_code(), "Evicting cached user");
                self.emit(CoreEvent::Auth(AuthStateEvent::CurrentUserEvicted {
                    uid: user.uid,
                    code: error.full_code(),
                }));
                self.directly_set_current_user(None).await
            }
        }
    }

    async fn directly_set_current_user(&self, user: Option<User>) -> Result<()> {
        let manager = self.user_persistence()?;
        match &user {
            Some(user) => manager.set_current(serde_json::to_value(user)?).await?,
            None => manager.remove_current().await?,
        }
        self.replace_current_user(user);
        Ok(())
    }

    fn replace_current_user(&self, user: Option<User>) {
        let uid = user.as_ref().map(|u| u.uid.clone());
        let previous = std::mem::replace(&mut *self.current_user.write(), user);
        if previous.map(|u| u.uid) != uid {
            self.emit(CoreEvent::Auth(AuthStateEvent::CurrentUserChanged { uid }));
        }
    }

    fn user_persistence(&self) -> Result<&PersistenceManager> {
        self.persistence
            .get()
            .ok_or_else(|| AuthError::internal("auth session used before initialization"))
    }

    async fn redirect_manager(&self) -> Result<&PersistenceManager> {
        self.redirect_persistence
            .get_or_try_init(|| async {
                let resolver = self.resolver.read().clone().ok_or_else(|| {
                    AuthError::Configuration(
                        "no popup/redirect resolver configured for this auth instance".to_string(),
                    )
                })?;
                let manager = PersistenceManager::create(
                    &[resolver.redirect_persistence()],
                    &self.config.api_key,
                    &self.config.app_name,
                    KeyName::RedirectUser,
                    None,
                )
                .await?;
                *self.redirect_user.write() = parse_user(manager.get_current().await?);
                Ok::<_, AuthError>(manager)
            })
            .await
    }

    fn storage_listener(&self) -> StorageListener {
        let this = self.this.clone();
        Arc::new(move |_value: Option<Value>| {
            if let Some(session) = this.upgrade() {
                spawn_task(
                    async move {
                        if let Err(error) = session.on_storage_event().await {
                            warn!(%error, "Failed to sync user from another tab");
                        }
                    },
                    false,
                );
            }
        })
    }

    /// Re-reads the persisted user after another context changed it.
    async fn on_storage_event(&self) -> Result<()> {
        let stored = parse_user(self.user_persistence()?.get_current().await?);
        let current_uid = self.current_user.read().as_ref().map(|u| u.uid.clone());

        match (current_uid, stored) {
            (None, None) => Ok(()),
            (Some(uid), Some(user)) if uid == user.uid => {
                *self.current_user.write() = Some(user);
                Ok(())
            }
            (_, stored) => {
                let _queue = self.queue.lock().await;
                debug!(uid = ?stored.as_ref().map(|u| &u.uid), "User changed in another context");
                self.replace_current_user(stored);
                Ok(())
            }
        }
    }

    /// Moves the current user to `persistence`.
    #[instrument(skip(self, persistence), fields(to = %persistence.persistence_type()))]
    pub async fn set_persistence(&self, persistence: Arc<dyn PersistenceBackend>) -> Result<()> {
        self.wait_initialized().await;
        let _queue = self.queue.lock().await;
        let manager = self.user_persistence()?;
        if let Some(previous) = manager.set_persistence(persistence).await? {
            self.emit(CoreEvent::Persistence(PersistenceEvent::BackendChanged {
                key: manager.full_key().to_string(),
                from: previous.to_string(),
                to: manager.persistence_type().to_string(),
            }));
        }
        Ok(())
    }

    pub fn persistence_type(&self) -> Option<PersistenceType> {
        self.persistence.get().map(|manager| manager.persistence_type())
    }

    /// Clears the current user and any pending redirect user.
    #[instrument(skip(self))]
    pub async fn sign_out(&self) -> Result<()> {
        self.wait_initialized().await;
        if self.resolver.read().is_some() {
            self.set_redirect_user(None).await?;
        }
        self.update_current_user(None).await
    }

    fn emit(&self, event: CoreEvent) {
        self.event_bus.emit(event).ok();
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl AuthHandle for AuthSession {
    fn key(&self) -> String {
        self.config.instance_key()
    }

    fn config(&self) -> &AuthConfig {
        &self.config
    }

    async fn wait_initialized(&self) {
        let mut initialized = self.initialized.subscribe();
        if initialized.wait_for(|ready| *ready).await.is_err() {
            warn!("Auth session dropped before initialization finished");
        }
    }

    fn current_user(&self) -> Option<User> {
        self.current_user.read().clone()
    }

    async fn redirect_user_for_id(&self, event_id: &str) -> Option<User> {
        if self.is_initialized() {
            // Let queued user updates land first.
            drop(self.queue.lock().await);
        }

        let matches = |user: &Option<User>| {
            user.as_ref()
                .filter(|u| u.redirect_event_id.as_deref() == Some(event_id))
                .cloned()
        };
        matches(&*self.current_user.read()).or_else(|| matches(&*self.redirect_user.read()))
    }

    async fn set_redirect_user(&self, user: Option<&User>) -> Result<()> {
        let manager = self.redirect_manager().await?;
        match user {
            Some(user) => manager.set_current(serde_json::to_value(user)?).await?,
            None => manager.remove_current().await?,
        }
        *self.redirect_user.write() = user.cloned();
        Ok(())
    }

    async fn persist_user_if_current(&self, user: &User) -> Result<()> {
        let is_current = self
            .current_user
            .read()
            .as_ref()
            .is_some_and(|current| current.uid == user.uid);
        if !is_current {
            return Ok(());
        }
        let _queue = self.queue.lock().await;
        self.directly_set_current_user(Some(user.clone())).await
    }

    async fn update_current_user(&self, user: Option<User>) -> Result<()> {
        let _queue = self.queue.lock().await;
        self.directly_set_current_user(user).await
    }
}
