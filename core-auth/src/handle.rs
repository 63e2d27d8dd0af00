use async_trait::async_trait;
use bridge_traits::platform::PlatformSendSync;
use core_runtime::config::AuthConfig;

use crate::error::Result;
use crate::types::User;

/// The auth instance an operation runs against.
///
/// Operations receive it at construction and never reach for a global.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait AuthHandle: PlatformSendSync {
    /// `<authDomain>:<apiKey>:<appName>`.
    fn key(&self) -> String;

    fn config(&self) -> &AuthConfig;

    /// Resolves once the persisted session has been restored.
    async fn wait_initialized(&self);

    fn current_user(&self) -> Option<User>;

    /// The user carrying `event_id` as its redirect event id, looked up in
    /// the current user and the persisted redirect user.
    async fn redirect_user_for_id(&self, event_id: &str) -> Option<User>;

    /// Persists (or clears, with `None`) the user a link/reauth redirect
    /// will complete for.
    async fn set_redirect_user(&self, user: Option<&User>) -> Result<()>;

    /// Persists `user` when it is the signed-in user.
    async fn persist_user_if_current(&self, user: &User) -> Result<()>;

    async fn update_current_user(&self, user: Option<User>) -> Result<()>;
}
