//! # Popup and Redirect Strategies
//!
//! [`AuthFlowManager`] is the public entry point for federated sign-in:
//!
//! | Operation | Popup | Redirect |
//! |-----------|-------|----------|
//! | sign in   | [`sign_in_with_popup`](AuthFlowManager::sign_in_with_popup) | [`sign_in_with_redirect`](AuthFlowManager::sign_in_with_redirect) |
//! | link      | [`link_with_popup`](AuthFlowManager::link_with_popup) | [`link_with_redirect`](AuthFlowManager::link_with_redirect) |
//! | reauth    | [`reauthenticate_with_popup`](AuthFlowManager::reauthenticate_with_popup) | [`reauthenticate_with_redirect`](AuthFlowManager::reauthenticate_with_redirect) |
//!
//! Redirect results are read on the next page load with
//! [`get_redirect_result`](AuthFlowManager::get_redirect_result).
//!
//! ## Usage
//!
//! ```no_run
//! # use core_auth::{AuthFlowManager, AuthProvider, AuthHandle, IdpClient, PopupRedirectResolver};
//! # use core_runtime::events::EventBus;
//! # use std::sync::Arc;
//! # async fn run(
//! #     auth: Arc<dyn AuthHandle>,
//! #     resolver: Arc<dyn PopupRedirectResolver>,
//! #     idp: Arc<dyn IdpClient>,
//! # ) -> core_auth::Result<()> {
//! let flows = AuthFlowManager::new(auth, resolver, idp, EventBus::default())?;
//!
//! let credential = flows
//!     .sign_in_with_popup(&AuthProvider::new("google.com"))
//!     .await?;
//! println!("signed in as {}", credential.user.uid);
//! # Ok(())
//! # }
//! ```

use core_runtime::events::{AuthStateEvent, CoreEvent, EventBus};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::error::{AuthError, AuthErrorCode, Result};
use crate::handle::AuthHandle;
use crate::idp::IdpClient;
use crate::operation::{AuthOperation, OperationContext, OperationKind};
use crate::popup::{PopupOperation, PopupSlot};
use crate::redirect::{
    execute_redirect, set_pending_redirect_status, RedirectOutcomeCache, REDIRECT_FILTER,
};
use crate::resolver::PopupRedirectResolver;
use crate::types::{
    generate_event_id, AuthEventType, AuthProvider, User, UserCredential, EVENT_ID_DIGITS,
};

pub struct AuthFlowManager {
    context: OperationContext,
    outcomes: Arc<RedirectOutcomeCache>,
    popups: Arc<PopupSlot>,
}

impl AuthFlowManager {
    /// Creates the flow manager of an auth instance.
    ///
    /// Fails when the auth instance has no auth domain, before any
    /// asynchronous work is started.
    pub fn new(
        auth: Arc<dyn AuthHandle>,
        resolver: Arc<dyn PopupRedirectResolver>,
        idp: Arc<dyn IdpClient>,
        event_bus: EventBus,
    ) -> Result<Self> {
        auth.config().require_auth_domain()?;
        let timeouts = auth.config().timeouts;
        Ok(Self {
            context: OperationContext {
                auth,
                resolver,
                idp,
                event_bus,
                timeouts,
            },
            outcomes: Arc::new(RedirectOutcomeCache::new()),
            popups: Arc::new(PopupSlot::new()),
        })
    }

    /// Shares a redirect outcome cache with other flow managers of the page.
    pub fn with_outcome_cache(mut self, outcomes: Arc<RedirectOutcomeCache>) -> Self {
        self.outcomes = outcomes;
        self
    }

    /// Shares the live-popup slot with other flow managers.
    pub fn with_popup_slot(mut self, popups: Arc<PopupSlot>) -> Self {
        self.popups = popups;
        self
    }

    pub fn resolver(&self) -> Arc<dyn PopupRedirectResolver> {
        self.context.resolver.clone()
    }

    pub fn popup_slot(&self) -> Arc<PopupSlot> {
        self.popups.clone()
    }

    #[instrument(skip(self, provider), fields(provider = %provider.provider_id))]
    pub async fn sign_in_with_popup(&self, provider: &AuthProvider) -> Result<UserCredential> {
        self.run_popup(AuthEventType::SignInViaPopup, provider, None)
            .await
    }

    #[instrument(skip(self, user, provider), fields(uid = %user.uid, provider = %provider.provider_id))]
    pub async fn link_with_popup(&self, user: &User, provider: &AuthProvider) -> Result<UserCredential> {
        let user = self.assert_not_linked(user, provider).await?;
        self.run_popup(AuthEventType::LinkViaPopup, provider, Some(user))
            .await
    }

    #[instrument(skip(self, user, provider), fields(uid = %user.uid, provider = %provider.provider_id))]
    pub async fn reauthenticate_with_popup(
        &self,
        user: &User,
        provider: &AuthProvider,
    ) -> Result<UserCredential> {
        self.run_popup(AuthEventType::ReauthViaPopup, provider, Some(user.clone()))
            .await
    }

    #[instrument(skip(self, provider), fields(provider = %provider.provider_id))]
    pub async fn sign_in_with_redirect(&self, provider: &AuthProvider) -> Result<()> {
        self.context.auth.wait_initialized().await;
        set_pending_redirect_status(self.context.resolver.as_ref(), self.context.auth.as_ref())
            .await?;
        self.context
            .resolver
            .open_redirect(
                self.context.auth.clone(),
                provider,
                AuthEventType::SignInViaRedirect,
                None,
            )
            .await
    }

    #[instrument(skip(self, user, provider), fields(uid = %user.uid, provider = %provider.provider_id))]
    pub async fn link_with_redirect(&self, user: &User, provider: &AuthProvider) -> Result<()> {
        let user = self.assert_not_linked(user, provider).await?;
        self.start_user_redirect(&user, provider, AuthEventType::LinkViaRedirect)
            .await
    }

    #[instrument(skip(self, user, provider), fields(uid = %user.uid, provider = %provider.provider_id))]
    pub async fn reauthenticate_with_redirect(
        &self,
        user: &User,
        provider: &AuthProvider,
    ) -> Result<()> {
        self.start_user_redirect(user, provider, AuthEventType::ReauthViaRedirect)
            .await
    }

    /// Reads the result of a redirect started from a previous page load.
    ///
    /// Returns `None` when no redirect was pending or the result was already
    /// read.
    #[instrument(skip(self))]
    pub async fn get_redirect_result(&self) -> Result<Option<UserCredential>> {
        self.context.auth.wait_initialized().await;
        let mut result = self.get_redirect_result_internal(false).await?;

        if let Some(credential) = &mut result {
            credential.user.redirect_event_id = None;
            self.context
                .auth
                .persist_user_if_current(&credential.user)
                .await?;
            self.context.auth.set_redirect_user(None).await?;
        }
        Ok(result)
    }

    /// Redirect outcome without the post-processing of
    /// [`get_redirect_result`](Self::get_redirect_result).
    ///
    /// With `bypass_auth_state` the signed-in user is not touched and the
    /// outcome stays memoised for the next regular read.
    pub async fn get_redirect_result_internal(
        &self,
        bypass_auth_state: bool,
    ) -> Result<Option<UserCredential>> {
        let operation = AuthOperation::new(
            self.context.clone(),
            REDIRECT_FILTER.to_vec(),
            None,
            bypass_auth_state,
            OperationKind::Redirect,
        );
        let auth_key = self.context.auth.key();
        let outcome = self
            .outcomes
            .outcome_for(&auth_key, bypass_auth_state, || execute_redirect(operation))
            .await;

        match &outcome {
            Ok(credential) => {
                let uid = credential.as_ref().map(|c| c.user.uid.clone());
                debug!(uid = ?uid, bypass_auth_state, "Redirect outcome read");
                self.emit(AuthStateEvent::RedirectResolved {
                    uid,
                    bypass_auth_state,
                });
            }
            Err(error) => self.report_failure(error),
        }
        outcome
    }

    async fn run_popup(
        &self,
        event_type: AuthEventType,
        provider: &AuthProvider,
        user: Option<User>,
    ) -> Result<UserCredential> {
        let operation = AuthOperation::new(
            self.context.clone(),
            vec![event_type],
            user,
            false,
            OperationKind::Popup(PopupOperation::new(
                provider.clone(),
                self.popups.clone(),
                self.context.timeouts,
            )),
        );
        self.popups.replace(&operation);

        let outcome = operation.execute().await.and_then(|credential| {
            credential.ok_or_else(|| AuthError::internal("popup operation settled without a credential"))
        });
        match &outcome {
            Ok(credential) => info!(uid = %credential.user.uid, "Popup operation completed"),
            Err(error) => self.report_failure(error),
        }
        outcome
    }

    async fn start_user_redirect(
        &self,
        user: &User,
        provider: &AuthProvider,
        event_type: AuthEventType,
    ) -> Result<()> {
        self.context.auth.wait_initialized().await;
        set_pending_redirect_status(self.context.resolver.as_ref(), self.context.auth.as_ref())
            .await?;
        let event_id = self.prepare_user_for_redirect(user).await?;
        self.context
            .resolver
            .open_redirect(self.context.auth.clone(), provider, event_type, Some(&event_id))
            .await
    }

    /// Stamps `user` with a fresh redirect event id and persists it as the
    /// redirect user.
    async fn prepare_user_for_redirect(&self, user: &User) -> Result<String> {
        let event_id = generate_event_id(&format!("{}:::", user.uid), EVENT_ID_DIGITS);
        let mut stamped = user.clone();
        stamped.redirect_event_id = Some(event_id.clone());

        self.context.auth.set_redirect_user(Some(&stamped)).await?;
        self.context.auth.persist_user_if_current(&stamped).await?;
        Ok(event_id)
    }

    /// Reloads `user` and fails if `provider` is already linked to it.
    async fn assert_not_linked(&self, user: &User, provider: &AuthProvider) -> Result<User> {
        let user = self.context.idp.reload_user(user.clone()).await?;
        if user.is_linked_to(&provider.provider_id) {
            warn!(uid = %user.uid, provider = %provider.provider_id, "Provider already linked");
            return Err(AuthError::new(AuthErrorCode::ProviderAlreadyLinked));
        }
        Ok(user)
    }

    fn report_failure(&self, error: &AuthError) {
        if error.is_cancellation() {
            info!(code = %error.full_code(), "Auth operation cancelled");
        } else {
            warn!(code = %error.full_code(), "Auth operation failed: {error}");
        }
        self.emit(AuthStateEvent::OperationFailed {
            code: error.full_code(),
            cancelled: error.is_cancellation(),
        });
    }

    fn emit(&self, event: AuthStateEvent) {
        self.context.event_bus.emit(CoreEvent::Auth(event)).ok();
    }
}
