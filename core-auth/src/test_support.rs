//! Test doubles shared by the unit tests of this crate.

use async_trait::async_trait;
use bridge_traits::popup::PopupWindow;
use bridge_traits::time::SystemClock;
use core_persistence::{InMemoryPersistence, PersistenceBackend};
use core_runtime::config::AuthConfig;
use mockall::mock;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{AuthError, AuthErrorCode, Result};
use crate::event_manager::AuthEventManager;
use crate::handle::AuthHandle;
use crate::idp::{IdTokenResponse, IdpClient, IdpRequest};
use crate::resolver::PopupRedirectResolver;
use crate::types::{AuthEventType, AuthProvider, User};

mock! {
    pub Idp {}

    #[async_trait]
    impl IdpClient for Idp {
        async fn sign_in_with_idp(&self, request: IdpRequest) -> Result<IdTokenResponse>;
        async fn reload_user(&self, user: User) -> Result<User>;
    }
}

/// In-memory auth handle without persistence.
pub struct StaticAuth {
    config: AuthConfig,
    current: Mutex<Option<User>>,
    redirect_user: Mutex<Option<User>>,
}

impl StaticAuth {
    pub fn new() -> Arc<Self> {
        let config = AuthConfig::builder()
            .api_key("api-key")
            .auth_domain("example.firebaseapp.com")
            .build()
            .expect("valid test config");
        Arc::new(Self {
            config,
            current: Mutex::new(None),
            redirect_user: Mutex::new(None),
        })
    }
}

#[async_trait]
impl AuthHandle for StaticAuth {
    fn key(&self) -> String {
        self.config.instance_key()
    }

    fn config(&self) -> &AuthConfig {
        &self.config
    }

    async fn wait_initialized(&self) {}

    fn current_user(&self) -> Option<User> {
        self.current.lock().clone()
    }

    async fn redirect_user_for_id(&self, event_id: &str) -> Option<User> {
        [self.current.lock().clone(), self.redirect_user.lock().clone()]
            .into_iter()
            .flatten()
            .find(|user| user.redirect_event_id.as_deref() == Some(event_id))
    }

    async fn set_redirect_user(&self, user: Option<&User>) -> Result<()> {
        *self.redirect_user.lock() = user.cloned();
        Ok(())
    }

    async fn persist_user_if_current(&self, user: &User) -> Result<()> {
        let mut current = self.current.lock();
        if current.as_ref().is_some_and(|c| c.uid == user.uid) {
            *current = Some(user.clone());
        }
        Ok(())
    }

    async fn update_current_user(&self, user: Option<User>) -> Result<()> {
        *self.current.lock() = user;
        Ok(())
    }
}

/// Resolver handing out one fixed event manager. Popups are always blocked.
pub struct StaticResolver {
    manager: Arc<AuthEventManager>,
    storage: Arc<InMemoryPersistence>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self {
            manager: Arc::new(AuthEventManager::new(
                "example.firebaseapp.com:api-key:[DEFAULT]",
                Arc::new(SystemClock),
                Duration::from_secs(600),
            )),
            storage: Arc::new(InMemoryPersistence::new()),
        }
    }

    pub fn manager(&self) -> Arc<AuthEventManager> {
        self.manager.clone()
    }
}

#[async_trait]
impl PopupRedirectResolver for StaticResolver {
    async fn initialize(&self, _auth: Arc<dyn AuthHandle>) -> Result<Arc<AuthEventManager>> {
        Ok(self.manager.clone())
    }

    async fn open_popup(
        &self,
        _auth: Arc<dyn AuthHandle>,
        _provider: &AuthProvider,
        _event_type: AuthEventType,
        _event_id: &str,
    ) -> Result<Arc<dyn PopupWindow>> {
        Err(AuthError::new(AuthErrorCode::PopupBlocked))
    }

    async fn open_redirect(
        &self,
        _auth: Arc<dyn AuthHandle>,
        _provider: &AuthProvider,
        _event_type: AuthEventType,
        _event_id: Option<&str>,
    ) -> Result<()> {
        Ok(())
    }

    async fn validate_origin(&self, _auth: Arc<dyn AuthHandle>) -> Result<()> {
        Ok(())
    }

    async fn is_iframe_web_storage_supported(&self, _auth: Arc<dyn AuthHandle>) -> bool {
        true
    }

    fn redirect_persistence(&self) -> Arc<dyn PersistenceBackend> {
        self.storage.clone()
    }
}
