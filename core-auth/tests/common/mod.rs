//! Fakes and a page harness shared by the core-auth integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::popup::PopupWindow;
use bridge_traits::time::SystemClock;
use core_auth::{
    AuthError, AuthEventManager, AuthEventType, AuthFlowManager, AuthHandle, AuthProvider,
    AuthSession, EventManagerRegistry, IdTokenResponse, IdpClient, IdpRequest,
    PopupRedirectResolver, ProviderInfo, Result, User,
};
use core_persistence::{persistence_key, InMemoryPersistence, KeyName, PersistenceBackend};
use core_runtime::config::AuthConfig;
use core_runtime::events::{AuthStateEvent, CoreEvent, EventBus, Receiver};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const API_KEY: &str = "api-key";
pub const AUTH_DOMAIN: &str = "example.firebaseapp.com";

pub fn config() -> AuthConfig {
    AuthConfig::builder()
        .api_key(API_KEY)
        .auth_domain(AUTH_DOMAIN)
        .build()
        .unwrap()
}

pub fn user_key() -> String {
    persistence_key(KeyName::AuthUser, API_KEY, "[DEFAULT]")
}

pub fn pending_redirect_key() -> String {
    persistence_key(KeyName::PendingRedirect, API_KEY, "[DEFAULT]")
}

/// Yields until `condition` holds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

pub fn auth_events(receiver: &mut Receiver<CoreEvent>) -> Vec<AuthStateEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        if let CoreEvent::Auth(event) = event {
            events.push(event);
        }
    }
    events
}

#[derive(Default)]
pub struct FakePopup {
    closed: AtomicBool,
    close_calls: AtomicUsize,
}

impl FakePopup {
    /// The user closes the window.
    pub fn dismiss(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

impl PopupWindow for FakePopup {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub struct OpenedPopup {
    pub event_type: AuthEventType,
    pub event_id: String,
    pub window: Arc<FakePopup>,
}

pub struct FakeResolver {
    registry: EventManagerRegistry,
    storage: Arc<InMemoryPersistence>,
    pub initialize_calls: AtomicUsize,
    pub popups: Mutex<Vec<OpenedPopup>>,
    pub redirects: Mutex<Vec<(AuthEventType, Option<String>)>>,
    pub popup_error: Mutex<Option<AuthError>>,
    pub origin_error: Mutex<Option<AuthError>>,
    pub web_storage_supported: AtomicBool,
    pub open_closed: AtomicBool,
}

impl FakeResolver {
    pub fn new(storage: Arc<InMemoryPersistence>) -> Arc<Self> {
        Arc::new(Self {
            registry: EventManagerRegistry::new(Arc::new(SystemClock), Duration::from_secs(600)),
            storage,
            initialize_calls: AtomicUsize::new(0),
            popups: Mutex::new(Vec::new()),
            redirects: Mutex::new(Vec::new()),
            popup_error: Mutex::new(None),
            origin_error: Mutex::new(None),
            web_storage_supported: AtomicBool::new(true),
            open_closed: AtomicBool::new(false),
        })
    }

    pub fn manager(&self) -> Arc<AuthEventManager> {
        self.registry.manager_for(&config().instance_key())
    }

    pub fn popup_count(&self) -> usize {
        self.popups.lock().len()
    }

    pub fn popup(&self, index: usize) -> (String, Arc<FakePopup>) {
        let popups = self.popups.lock();
        let popup = &popups[index];
        (popup.event_id.clone(), popup.window.clone())
    }

    pub fn last_redirect(&self) -> Option<(AuthEventType, Option<String>)> {
        self.redirects.lock().last().cloned()
    }
}

#[async_trait]
impl PopupRedirectResolver for FakeResolver {
    async fn initialize(&self, auth: Arc<dyn AuthHandle>) -> Result<Arc<AuthEventManager>> {
        self.initialize_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.registry.manager_for(&auth.key()))
    }

    async fn open_popup(
        &self,
        _auth: Arc<dyn AuthHandle>,
        _provider: &AuthProvider,
        event_type: AuthEventType,
        event_id: &str,
    ) -> Result<Arc<dyn PopupWindow>> {
        if let Some(error) = self.popup_error.lock().clone() {
            return Err(error);
        }
        let window = Arc::new(FakePopup::default());
        if self.open_closed.load(Ordering::SeqCst) {
            window.dismiss();
        }
        self.popups.lock().push(OpenedPopup {
            event_type,
            event_id: event_id.to_string(),
            window: window.clone(),
        });
        Ok(window)
    }

    async fn open_redirect(
        &self,
        _auth: Arc<dyn AuthHandle>,
        _provider: &AuthProvider,
        event_type: AuthEventType,
        event_id: Option<&str>,
    ) -> Result<()> {
        self.redirects
            .lock()
            .push((event_type, event_id.map(str::to_string)));
        Ok(())
    }

    async fn validate_origin(&self, _auth: Arc<dyn AuthHandle>) -> Result<()> {
        match self.origin_error.lock().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn is_iframe_web_storage_supported(&self, _auth: Arc<dyn AuthHandle>) -> bool {
        self.web_storage_supported.load(Ordering::SeqCst)
    }

    fn redirect_persistence(&self) -> Arc<dyn PersistenceBackend> {
        self.storage.clone()
    }
}

/// Identity backend answering every exchange for one account.
pub struct FakeIdp {
    local_id: Mutex<String>,
    provider_id: Mutex<Option<String>>,
    reload_error: Mutex<Option<AuthError>>,
    linked_on_reload: Mutex<Vec<String>>,
    pub requests: Mutex<Vec<IdpRequest>>,
    pub reloads: AtomicUsize,
}

impl Default for FakeIdp {
    fn default() -> Self {
        Self {
            local_id: Mutex::new("federated-uid".to_string()),
            provider_id: Mutex::new(Some("google.com".to_string())),
            reload_error: Mutex::new(None),
            linked_on_reload: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            reloads: AtomicUsize::new(0),
        }
    }
}

impl FakeIdp {
    pub fn set_local_id(&self, uid: &str) {
        *self.local_id.lock() = uid.to_string();
    }

    pub fn fail_reload_with(&self, error: AuthError) {
        *self.reload_error.lock() = Some(error);
    }

    pub fn link_on_reload(&self, provider_id: &str) {
        self.linked_on_reload.lock().push(provider_id.to_string());
    }
}

#[async_trait]
impl IdpClient for FakeIdp {
    async fn sign_in_with_idp(&self, request: IdpRequest) -> Result<IdTokenResponse> {
        self.requests.lock().push(request);
        Ok(IdTokenResponse {
            local_id: self.local_id.lock().clone(),
            id_token: "id-token".to_string(),
            refresh_token: "refresh-token".to_string(),
            provider_id: self.provider_id.lock().clone(),
            is_new_user: false,
        })
    }

    async fn reload_user(&self, mut user: User) -> Result<User> {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.reload_error.lock().clone() {
            return Err(error);
        }
        for provider_id in self.linked_on_reload.lock().iter() {
            if !user.is_linked_to(provider_id) {
                user.provider_data.push(ProviderInfo {
                    provider_id: provider_id.clone(),
                    uid: None,
                });
            }
        }
        Ok(user)
    }
}

/// One page load of an app using popup/redirect sign-in.
///
/// Storage outlives the page; the event manager, session and flows do not.
pub struct Page {
    pub storage: Arc<InMemoryPersistence>,
    pub resolver: Arc<FakeResolver>,
    pub idp: Arc<FakeIdp>,
    pub events: EventBus,
    pub session: Arc<AuthSession>,
    pub flows: Arc<AuthFlowManager>,
}

impl Page {
    pub fn new() -> Self {
        Self::with_storage(Arc::new(InMemoryPersistence::new()), Arc::new(FakeIdp::default()))
    }

    pub fn with_storage(storage: Arc<InMemoryPersistence>, idp: Arc<FakeIdp>) -> Self {
        let events = EventBus::default();
        let resolver = FakeResolver::new(storage.clone());
        let session = AuthSession::new(config(), idp.clone(), events.clone());
        let flows = AuthFlowManager::new(
            session.clone(),
            resolver.clone(),
            idp.clone(),
            events.clone(),
        )
        .unwrap();
        Self {
            storage,
            resolver,
            idp,
            events,
            session,
            flows: Arc::new(flows),
        }
    }

    /// The next page load, sharing storage and the identity backend.
    pub fn reload(&self) -> Self {
        Self::with_storage(self.storage.clone(), self.idp.clone())
    }

    pub async fn start(&self) {
        let hierarchy: Vec<Arc<dyn PersistenceBackend>> = vec![self.storage.clone()];
        self.session
            .initialize(&hierarchy, Some(self.flows.as_ref()))
            .await
            .unwrap();
    }

    pub fn manager(&self) -> Arc<AuthEventManager> {
        self.resolver.manager()
    }

    pub async fn store_user(&self, user: &User) {
        self.storage
            .set(&user_key(), serde_json::to_value(user).unwrap())
            .await
            .unwrap();
    }

    pub async fn stored_user(&self) -> Option<User> {
        self.storage
            .get(&user_key())
            .await
            .unwrap()
            .map(|value| serde_json::from_value(value).unwrap())
    }
}
