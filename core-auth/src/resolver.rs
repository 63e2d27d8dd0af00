//! Host integration for opening popups and redirects.

use async_trait::async_trait;
use bridge_traits::platform::PlatformSendSync;
use bridge_traits::popup::PopupWindow;
use core_persistence::PersistenceBackend;
use std::sync::Arc;

use crate::error::Result;
use crate::event_manager::AuthEventManager;
use crate::handle::AuthHandle;
use crate::types::{AuthEventType, AuthProvider};

/// Opens auth handler windows and feeds their results back as auth events.
///
/// Implementations memoise one [`AuthEventManager`] per auth instance (see
/// [`EventManagerRegistry`](crate::event_manager::EventManagerRegistry)) and
/// hand every received event to it.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait PopupRedirectResolver: PlatformSendSync {
    /// Prepares event delivery for `auth` and returns its event manager.
    async fn initialize(&self, auth: Arc<dyn AuthHandle>) -> Result<Arc<AuthEventManager>>;

    async fn open_popup(
        &self,
        auth: Arc<dyn AuthHandle>,
        provider: &AuthProvider,
        event_type: AuthEventType,
        event_id: &str,
    ) -> Result<Arc<dyn PopupWindow>>;

    /// Navigates away. Only returns when navigation could not start.
    async fn open_redirect(
        &self,
        auth: Arc<dyn AuthHandle>,
        provider: &AuthProvider,
        event_type: AuthEventType,
        event_id: Option<&str>,
    ) -> Result<()>;

    /// Checks that the current origin may run popup operations.
    async fn validate_origin(&self, auth: Arc<dyn AuthHandle>) -> Result<()>;

    async fn is_iframe_web_storage_supported(&self, auth: Arc<dyn AuthHandle>) -> bool;

    /// Backend holding the redirect user.
    fn redirect_persistence(&self) -> Arc<dyn PersistenceBackend>;

    /// Backend holding the pending-redirect flag.
    fn resolver_persistence(&self) -> Arc<dyn PersistenceBackend> {
        self.redirect_persistence()
    }
}
