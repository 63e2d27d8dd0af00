//! Persisted key layout: `firebase:<purpose>:<apiKey>:<appName>`.

use std::fmt;

/// Namespace shared by every persisted key.
pub const KEY_NAMESPACE: &str = "firebase";

/// Key written and removed again by availability checks.
pub const STORAGE_AVAILABLE_KEY: &str = "__sak";

/// Purpose component of a persisted key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyName {
    /// The signed-in user.
    AuthUser,
    /// Partial auth event of native-app deep-link flows.
    AuthEvent,
    /// The user a link/reauth redirect was started for.
    RedirectUser,
    /// Persistence type saved across a redirect.
    Persistence,
    /// Flag set while a redirect is in flight.
    PendingRedirect,
}

impl KeyName {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyName::AuthUser => "authUser",
            KeyName::AuthEvent => "authEvent",
            KeyName::RedirectUser => "redirectUser",
            KeyName::Persistence => "persistence",
            KeyName::PendingRedirect => "pendingRedirect",
        }
    }
}

impl fmt::Display for KeyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds the fully qualified key for `name` in the given auth instance.
pub fn persistence_key(name: KeyName, api_key: &str, app_name: &str) -> String {
    format!("{}:{}:{}:{}", KEY_NAMESPACE, name, api_key, app_name)
}
