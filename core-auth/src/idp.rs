//! # Identity Provider Tasks
//!
//! The three ways an auth event completes: sign in, link, reauthenticate.
//! Each task exchanges the handler page's response for an id token through
//! the [`IdpClient`] and builds the [`UserCredential`].
//!
//! With `bypass_auth_state` set the tasks leave the signed-in user alone;
//! session bootstrap uses this to read a redirect result before the session
//! is restored.

use async_trait::async_trait;
use bridge_traits::platform::PlatformSendSync;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::error::{AuthError, AuthErrorCode, Result};
use crate::handle::AuthHandle;
use crate::types::{AuthEventType, OperationType, ProviderInfo, User, UserCredential};

/// Body of the id-token exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdpRequest {
    pub request_uri: String,
    pub session_id: Option<String>,
    pub post_body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Set when linking, to attach the credential to this user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    pub return_secure_token: bool,
    pub return_idp_credential: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdTokenResponse {
    pub local_id: String,
    pub id_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub is_new_user: bool,
}

/// Identity backend the tasks talk to.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait IdpClient: PlatformSendSync {
    async fn sign_in_with_idp(&self, request: IdpRequest) -> Result<IdTokenResponse>;

    /// Refreshes a persisted user from the backend.
    async fn reload_user(&self, user: User) -> Result<User>;
}

/// Everything a task needs, taken from the auth event and the operation.
pub struct IdpTaskParams {
    pub auth: Arc<dyn AuthHandle>,
    pub idp: Arc<dyn IdpClient>,
    pub request_uri: String,
    pub session_id: Option<String>,
    pub tenant_id: Option<String>,
    pub post_body: Option<String>,
    pub user: Option<User>,
    pub bypass_auth_state: bool,
}

impl IdpTaskParams {
    fn request(&self, id_token: Option<String>) -> IdpRequest {
        IdpRequest {
            request_uri: self.request_uri.clone(),
            session_id: self.session_id.clone(),
            post_body: self.post_body.clone(),
            tenant_id: self.tenant_id.clone(),
            id_token,
            return_secure_token: true,
            return_idp_credential: true,
        }
    }

    fn take_user(&mut self) -> Result<User> {
        self.user
            .take()
            .ok_or_else(|| AuthError::internal("operation has no user to complete for"))
    }
}

/// Which task completes an event of `event_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdpTask {
    SignIn,
    Link,
    Reauth,
}

impl IdpTask {
    pub fn for_event(event_type: AuthEventType) -> Result<Self> {
        match event_type {
            AuthEventType::SignInViaPopup | AuthEventType::SignInViaRedirect => Ok(IdpTask::SignIn),
            AuthEventType::LinkViaPopup | AuthEventType::LinkViaRedirect => Ok(IdpTask::Link),
            AuthEventType::ReauthViaPopup | AuthEventType::ReauthViaRedirect => Ok(IdpTask::Reauth),
            other => Err(AuthError::internal(format!(
                "no task completes {other} events"
            ))),
        }
    }

    pub async fn run(self, params: IdpTaskParams) -> Result<UserCredential> {
        match self {
            IdpTask::SignIn => sign_in(params).await,
            IdpTask::Link => link(params).await,
            IdpTask::Reauth => reauth(params).await,
        }
    }
}

fn apply_tokens(user: &mut User, response: &IdTokenResponse) {
    user.id_token = Some(response.id_token.clone());
    user.refresh_token = Some(response.refresh_token.clone());
}

#[instrument(skip(params), fields(bypass = params.bypass_auth_state))]
pub async fn sign_in(params: IdpTaskParams) -> Result<UserCredential> {
    let response = params.idp.sign_in_with_idp(params.request(None)).await?;

    let mut user = User::new(response.local_id.clone());
    apply_tokens(&mut user, &response);
    if let Some(provider_id) = &response.provider_id {
        user.provider_data.push(ProviderInfo {
            provider_id: provider_id.clone(),
            uid: None,
        });
    }

    if !params.bypass_auth_state {
        params.auth.update_current_user(Some(user.clone())).await?;
    }
    debug!(uid = %user.uid, "Signed in with identity provider");

    Ok(UserCredential {
        user,
        operation_type: OperationType::SignIn,
        provider_id: response.provider_id,
        is_new_user: response.is_new_user,
    })
}

#[instrument(skip(params), fields(bypass = params.bypass_auth_state))]
pub async fn link(mut params: IdpTaskParams) -> Result<UserCredential> {
    let mut user = params.take_user()?;
    let response = params
        .idp
        .sign_in_with_idp(params.request(user.id_token.clone()))
        .await?;

    apply_tokens(&mut user, &response);
    if let Some(provider_id) = &response.provider_id {
        if !user.is_linked_to(provider_id) {
            user.provider_data.push(ProviderInfo {
                provider_id: provider_id.clone(),
                uid: None,
            });
        }
    }
    if !params.bypass_auth_state {
        params.auth.persist_user_if_current(&user).await?;
    }

    Ok(UserCredential {
        user,
        operation_type: OperationType::Link,
        provider_id: response.provider_id,
        is_new_user: response.is_new_user,
    })
}

#[instrument(skip(params), fields(bypass = params.bypass_auth_state))]
pub async fn reauth(mut params: IdpTaskParams) -> Result<UserCredential> {
    let mut user = params.take_user()?;
    let response = params.idp.sign_in_with_idp(params.request(None)).await?;

    if response.local_id != user.uid {
        warn!(expected = %user.uid, actual = %response.local_id, "Reauthenticated as a different user");
        return Err(AuthError::new(AuthErrorCode::UserMismatch));
    }

    apply_tokens(&mut user, &response);
    if !params.bypass_auth_state {
        params.auth.persist_user_if_current(&user).await?;
    }

    Ok(UserCredential {
        user,
        operation_type: OperationType::Reauthenticate,
        provider_id: response.provider_id,
        is_new_user: false,
    })
}
