use core_persistence::PersistenceError;
use std::fmt;
use thiserror::Error;

use crate::types::AuthEventError;

/// Prefix carried by every code that crosses the event boundary.
pub const AUTH_CODE_PREFIX: &str = "auth/";

/// Stable codes the coordination layer produces itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthErrorCode {
    PopupClosedByUser,
    ExpiredPopupRequest,
    PopupBlocked,
    NetworkRequestFailed,
    WebStorageUnsupported,
    UnauthorizedDomain,
    UserMismatch,
    ProviderAlreadyLinked,
    NoAuthEvent,
    ArgumentError,
    InternalError,
}

impl AuthErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthErrorCode::PopupClosedByUser => "popup-closed-by-user",
            AuthErrorCode::ExpiredPopupRequest => "cancelled-popup-request",
            AuthErrorCode::PopupBlocked => "popup-blocked",
            AuthErrorCode::NetworkRequestFailed => "network-request-failed",
            AuthErrorCode::WebStorageUnsupported => "web-storage-unsupported",
            AuthErrorCode::UnauthorizedDomain => "unauthorized-domain",
            AuthErrorCode::UserMismatch => "user-mismatch",
            AuthErrorCode::ProviderAlreadyLinked => "provider-already-linked",
            AuthErrorCode::NoAuthEvent => "no-auth-event",
            AuthErrorCode::ArgumentError => "argument-error",
            AuthErrorCode::InternalError => "internal-error",
        }
    }

    /// Parses an unprefixed code.
    pub fn parse(code: &str) -> Option<Self> {
        let parsed = match code {
            "popup-closed-by-user" => AuthErrorCode::PopupClosedByUser,
            "cancelled-popup-request" => AuthErrorCode::ExpiredPopupRequest,
            "popup-blocked" => AuthErrorCode::PopupBlocked,
            "network-request-failed" => AuthErrorCode::NetworkRequestFailed,
            "web-storage-unsupported" => AuthErrorCode::WebStorageUnsupported,
            "unauthorized-domain" => AuthErrorCode::UnauthorizedDomain,
            "user-mismatch" => AuthErrorCode::UserMismatch,
            "provider-already-linked" => AuthErrorCode::ProviderAlreadyLinked,
            "no-auth-event" => AuthErrorCode::NoAuthEvent,
            "argument-error" => AuthErrorCode::ArgumentError,
            "internal-error" => AuthErrorCode::InternalError,
            _ => return None,
        };
        Some(parsed)
    }

    fn default_message(&self) -> &'static str {
        match self {
            AuthErrorCode::PopupClosedByUser => {
                "The popup has been closed by the user before finalizing the operation"
            }
            AuthErrorCode::ExpiredPopupRequest => {
                "This operation has been cancelled due to another conflicting popup being opened"
            }
            AuthErrorCode::PopupBlocked => "Unable to establish a connection with the popup",
            AuthErrorCode::NetworkRequestFailed => "A network error has occurred",
            AuthErrorCode::WebStorageUnsupported => {
                "This browser is not supported or 3rd party cookies and data may be disabled"
            }
            AuthErrorCode::UnauthorizedDomain => {
                "This domain is not authorized for OAuth operations"
            }
            AuthErrorCode::UserMismatch => {
                "The supplied credentials do not correspond to the previously signed in user"
            }
            AuthErrorCode::ProviderAlreadyLinked => {
                "User can only be linked to one identity for the given provider"
            }
            AuthErrorCode::NoAuthEvent => "No auth event was found",
            AuthErrorCode::ArgumentError => "Invalid argument",
            AuthErrorCode::InternalError => "An internal error has occurred",
        }
    }
}

impl fmt::Display for AuthErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("auth/{code}: {message}")]
    Auth { code: AuthErrorCode, message: String },

    /// Code reported by the identity provider that has no dedicated variant.
    #[error("auth/{code}: {message}")]
    Provider { code: String, message: String },

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Persistence failed: {0}")]
    Persistence(String),
}

impl AuthError {
    pub fn new(code: AuthErrorCode) -> Self {
        AuthError::Auth {
            code,
            message: code.default_message().to_string(),
        }
    }

    pub fn with_message(code: AuthErrorCode, message: impl Into<String>) -> Self {
        AuthError::Auth {
            code,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_message(AuthErrorCode::InternalError, message)
    }

    /// Converts the error carried by an auth event.
    ///
    /// Codes without the `auth/` prefix are not trusted and become
    /// `internal-error`.
    pub fn from_event_error(error: &AuthEventError) -> Self {
        let Some(code) = error.code.strip_prefix(AUTH_CODE_PREFIX) else {
            return Self::new(AuthErrorCode::InternalError);
        };
        match (AuthErrorCode::parse(code), &error.message) {
            (Some(known), Some(message)) => Self::with_message(known, message.clone()),
            (Some(known), None) => Self::new(known),
            (None, message) => AuthError::Provider {
                code: code.to_string(),
                message: message.clone().unwrap_or_default(),
            },
        }
    }

    /// Unprefixed code, e.g. `popup-closed-by-user`.
    pub fn code(&self) -> &str {
        match self {
            AuthError::Auth { code, .. } => code.as_str(),
            AuthError::Provider { code, .. } => code,
            AuthError::Configuration(_) => AuthErrorCode::ArgumentError.as_str(),
            AuthError::Persistence(_) => AuthErrorCode::InternalError.as_str(),
        }
    }

    /// Code as reported to callers, e.g. `auth/popup-closed-by-user`.
    pub fn full_code(&self) -> String {
        format!("{}{}", AUTH_CODE_PREFIX, self.code())
    }

    pub fn has_code(&self, code: AuthErrorCode) -> bool {
        self.code() == code.as_str()
    }

    /// User-initiated cancellations (closed or superseded popups).
    pub fn is_cancellation(&self) -> bool {
        self.has_code(AuthErrorCode::PopupClosedByUser)
            || self.has_code(AuthErrorCode::ExpiredPopupRequest)
    }

    pub fn is_network_error(&self) -> bool {
        self.has_code(AuthErrorCode::NetworkRequestFailed)
    }
}

impl From<PersistenceError> for AuthError {
    fn from(error: PersistenceError) -> Self {
        AuthError::Persistence(error.to_string())
    }
}

impl From<core_runtime::Error> for AuthError {
    fn from(error: core_runtime::Error) -> Self {
        AuthError::Configuration(error.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(error: serde_json::Error) -> Self {
        AuthError::Persistence(format!("malformed persisted value: {error}"))
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
