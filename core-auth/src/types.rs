//! Auth event and user records shared by the coordination layer.

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::{AuthErrorCode, AUTH_CODE_PREFIX};

/// Number of random digits in a generated event id.
pub const EVENT_ID_DIGITS: usize = 10;

/// What an [`AuthEvent`] completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthEventType {
    SignInViaPopup,
    LinkViaPopup,
    ReauthViaPopup,
    SignInViaRedirect,
    LinkViaRedirect,
    ReauthViaRedirect,
    Unknown,
    VerifyApp,
}

impl AuthEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthEventType::SignInViaPopup => "signInViaPopup",
            AuthEventType::LinkViaPopup => "linkViaPopup",
            AuthEventType::ReauthViaPopup => "reauthViaPopup",
            AuthEventType::SignInViaRedirect => "signInViaRedirect",
            AuthEventType::LinkViaRedirect => "linkViaRedirect",
            AuthEventType::ReauthViaRedirect => "reauthViaRedirect",
            AuthEventType::Unknown => "unknown",
            AuthEventType::VerifyApp => "verifyApp",
        }
    }

    /// One of the three `*ViaRedirect` types.
    pub fn is_redirect(&self) -> bool {
        matches!(
            self,
            AuthEventType::SignInViaRedirect
                | AuthEventType::LinkViaRedirect
                | AuthEventType::ReauthViaRedirect
        )
    }
}

impl fmt::Display for AuthEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error reported by the auth handler page, with a provider-tagged code
/// such as `auth/popup-blocked`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthEventError {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Completion notice delivered by the popup/redirect integration layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthEvent {
    #[serde(rename = "type")]
    pub event_type: AuthEventType,
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub url_response: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub post_body: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub error: Option<AuthEventError>,
}

impl AuthEvent {
    pub fn new(event_type: AuthEventType) -> Self {
        Self {
            event_type,
            event_id: None,
            url_response: None,
            session_id: None,
            post_body: None,
            tenant_id: None,
            error: None,
        }
    }

    /// The event the handler page reports when a page load carries no
    /// redirect result.
    pub fn no_auth_event() -> Self {
        Self {
            error: Some(AuthEventError {
                code: format!("{}{}", AUTH_CODE_PREFIX, AuthErrorCode::NoAuthEvent),
                message: None,
            }),
            ..Self::new(AuthEventType::Unknown)
        }
    }

    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_url_response(mut self, url_response: impl Into<String>) -> Self {
        self.url_response = Some(url_response.into());
        self
    }

    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_error(mut self, code: impl Into<String>) -> Self {
        self.error = Some(AuthEventError {
            code: code.into(),
            message: None,
        });
        self
    }

    /// `unknown` carrying `auth/no-auth-event`.
    pub fn is_null_redirect(&self) -> bool {
        self.event_type == AuthEventType::Unknown
            && self.error.as_ref().is_some_and(|error| {
                error.code.strip_prefix(AUTH_CODE_PREFIX)
                    == Some(AuthErrorCode::NoAuthEvent.as_str())
            })
    }

    /// Redirect types and the null-redirect sentinel.
    pub fn is_redirect_class(&self) -> bool {
        self.event_type.is_redirect() || self.is_null_redirect()
    }

    /// Dedup key: the non-empty identifying fields joined with `-`.
    pub fn dedup_key(&self) -> String {
        [
            Some(self.event_type.as_str()),
            self.event_id.as_deref(),
            self.session_id.as_deref(),
            self.tenant_id.as_deref(),
        ]
        .into_iter()
        .flatten()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
    }
}

/// Provider entry attached to a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    pub provider_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

/// Persisted session user.
///
/// Only the fields read here are typed; everything else round-trips through
/// `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub uid: String,
    #[serde(
        default,
        rename = "_redirectEventId",
        skip_serializing_if = "Option::is_none"
    )]
    pub redirect_event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub provider_data: Vec<ProviderInfo>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl User {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            redirect_event_id: None,
            id_token: None,
            refresh_token: None,
            provider_data: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn is_linked_to(&self, provider_id: &str) -> bool {
        self.provider_data
            .iter()
            .any(|info| info.provider_id == provider_id)
    }
}

/// Which public operation produced a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationType {
    SignIn,
    Link,
    Reauthenticate,
}

/// Result of a completed popup or redirect operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCredential {
    pub user: User,
    pub operation_type: OperationType,
    pub provider_id: Option<String>,
    pub is_new_user: bool,
}

/// Federated provider a popup or redirect is opened for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthProvider {
    pub provider_id: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl AuthProvider {
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            scopes: Vec::new(),
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scopes.push(scope.into());
        self
    }
}

/// `prefix` followed by `digits` random decimal digits.
pub fn generate_event_id(prefix: &str, digits: usize) -> String {
    let mut rng = rand::thread_rng();
    let mut id = String::with_capacity(prefix.len() + digits);
    id.push_str(prefix);
    for _ in 0..digits {
        id.push(char::from(b'0' + rng.gen_range(0..10u8)));
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_wire_shape() {
        let event: AuthEvent = serde_json::from_value(json!({
            "type": "signInViaPopup",
            "eventId": "123",
            "urlResponse": "https://example.com/?code=1",
            "sessionId": "sid",
            "tenantId": null,
        }))
        .unwrap();

        assert_eq!(event.event_type, AuthEventType::SignInViaPopup);
        assert_eq!(event.event_id.as_deref(), Some("123"));
        assert_eq!(event.tenant_id, None);
        assert_eq!(event.error, None);
    }

    #[test]
    fn test_dedup_key_skips_empty_parts() {
        let event = AuthEvent::new(AuthEventType::SignInViaRedirect)
            .with_event_id("id")
            .with_tenant_id("");
        assert_eq!(event.dedup_key(), "signInViaRedirect-id");

        let event = AuthEvent::new(AuthEventType::LinkViaPopup)
            .with_event_id("id")
            .with_session_id("sid")
            .with_tenant_id("t1");
        assert_eq!(event.dedup_key(), "linkViaPopup-id-sid-t1");
    }

    #[test]
    fn test_redirect_classification() {
        assert!(AuthEvent::no_auth_event().is_null_redirect());
        assert!(AuthEvent::no_auth_event().is_redirect_class());
        assert!(!AuthEvent::new(AuthEventType::Unknown).is_redirect_class());
        assert!(!AuthEvent::new(AuthEventType::Unknown)
            .with_error("auth/internal-error")
            .is_null_redirect());
        assert!(AuthEvent::new(AuthEventType::ReauthViaRedirect).is_redirect_class());
        assert!(!AuthEvent::new(AuthEventType::SignInViaPopup).is_redirect_class());
    }

    #[test]
    fn test_user_round_trips_unknown_fields() {
        let raw = json!({
            "uid": "u1",
            "_redirectEventId": "u1:::0123456789",
            "providerData": [{"providerId": "google.com"}],
            "stsTokenManager": {"expirationTime": 1}
        });
        let user: User = serde_json::from_value(raw.clone()).unwrap();
        assert!(user.is_linked_to("google.com"));
        assert_eq!(user.redirect_event_id.as_deref(), Some("u1:::0123456789"));
        assert_eq!(serde_json::to_value(&user).unwrap(), raw);
    }

    #[test]
    fn test_generate_event_id() {
        let id = generate_event_id("u1:::", EVENT_ID_DIGITS);
        assert!(id.starts_with("u1:::"));
        assert_eq!(id.len(), 5 + EVENT_ID_DIGITS);
        assert!(id[5..].chars().all(|c| c.is_ascii_digit()));
    }
}
