//! # Auth Configuration Module
//!
//! Provides configuration management for the auth coordination core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct an
//! [`AuthConfig`] holding the identity of the auth instance (API key, app
//! name, auth domain) and every timing knob the coordination layer uses.
//! Validation is fail-fast and synchronous: a missing API key is reported by
//! [`AuthConfigBuilder::build`] before any asynchronous work starts, and a
//! missing auth domain is reported by [`AuthConfig::require_auth_domain`]
//! before a popup or redirect flow is started.
//!
//! ## Usage
//!
//! ```
//! use core_runtime::config::AuthConfig;
//! use std::time::Duration;
//!
//! let config = AuthConfig::builder()
//!     .api_key("api-key")
//!     .auth_domain("example.firebaseapp.com")
//!     .popup_closed_grace(Duration::from_secs(8))
//!     .build()
//!     .expect("valid config");
//!
//! assert_eq!(config.app_name, "[DEFAULT]");
//! assert_eq!(config.instance_key(), "example.firebaseapp.com:api-key:[DEFAULT]");
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::AuthConfig;
//!
//! // Panics: the API key is required.
//! let config = AuthConfig::builder()
//!     .auth_domain("example.firebaseapp.com")
//!     .build()
//!     .expect("Should fail - missing API key");
//! ```

use crate::error::{Error, Result};
use std::time::Duration;

/// Name used when the host does not name its app instance.
pub const DEFAULT_APP_NAME: &str = "[DEFAULT]";

/// Every delay and window used by the coordination layer.
///
/// The defaults match browser behaviour the rest of the system was tuned
/// against; hosts normally only override them in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Lower bound of the popup-closed polling delay.
    pub popup_poll_min: Duration,
    /// Upper bound of the popup-closed polling delay.
    pub popup_poll_max: Duration,
    /// Grace period between observing a closed popup and rejecting.
    pub popup_closed_grace: Duration,
    /// Poll interval for web storage change detection.
    pub storage_poll_interval: Duration,
    /// Poll interval for the durable object store.
    pub durable_poll_interval: Duration,
    /// Extra attempts for a failed durable store transaction.
    pub durable_retry_count: u32,
    /// Wait for the receiver's ACK.
    pub ack: Duration,
    /// ACK wait once the receiver answered a capability ping.
    pub long_ack: Duration,
    /// Wait for DONE after the ACK arrived.
    pub completion: Duration,
    /// Coarse window after which the event dedup cache is dropped.
    pub dedup_window: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            popup_poll_min: Duration::from_secs(2),
            popup_poll_max: Duration::from_secs(10),
            popup_closed_grace: Duration::from_secs(8),
            storage_poll_interval: Duration::from_millis(1000),
            durable_poll_interval: Duration::from_millis(800),
            durable_retry_count: 3,
            ack: Duration::from_secs(2),
            long_ack: Duration::from_secs(8),
            completion: Duration::from_secs(20),
            dedup_window: Duration::from_secs(10 * 60),
        }
    }
}

impl Timeouts {
    /// Validates the timing configuration.
    pub fn validate(&self) -> Result<()> {
        if self.popup_poll_min.is_zero() {
            return Err(Error::Config(
                "Popup poll delay must be greater than 0ms".to_string(),
            ));
        }

        if self.popup_poll_min > self.popup_poll_max {
            return Err(Error::Config(format!(
                "Popup poll window is inverted: min {:?} > max {:?}",
                self.popup_poll_min, self.popup_poll_max
            )));
        }

        if self.storage_poll_interval.is_zero() || self.durable_poll_interval.is_zero() {
            return Err(Error::Config(
                "Storage poll intervals must be greater than 0ms".to_string(),
            ));
        }

        if self.ack.is_zero() || self.completion.is_zero() {
            return Err(Error::Config(
                "Sync channel timeouts must be greater than 0ms".to_string(),
            ));
        }

        if self.long_ack < self.ack {
            return Err(Error::Config(
                "Long ACK timeout must not be shorter than the ACK timeout".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration for one auth instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    /// Web API key of the project. Part of every persisted key.
    pub api_key: String,

    /// App instance name. Part of every persisted key.
    pub app_name: String,

    /// Domain hosting the auth handler page. Required for popup and redirect flows.
    pub auth_domain: Option<String>,

    /// Prefer polling over native storage events for same-tab change
    /// detection. Hosts set this on mobile browsers where storage events are
    /// unreliable.
    pub prefer_storage_polling: bool,

    /// Timing knobs.
    pub timeouts: Timeouts,
}

impl AuthConfig {
    /// Creates a new builder for constructing an `AuthConfig`.
    pub fn builder() -> AuthConfigBuilder {
        AuthConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - API key is not empty
    /// - App name is not empty
    /// - Auth domain, when set, is not empty
    /// - Timeouts are consistent
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(Error::Config("API key cannot be empty".to_string()));
        }

        if self.app_name.trim().is_empty() {
            return Err(Error::Config("App name cannot be empty".to_string()));
        }

        if let Some(domain) = &self.auth_domain {
            if domain.trim().is_empty() {
                return Err(Error::Config("Auth domain cannot be empty".to_string()));
            }
        }

        self.timeouts.validate()
    }

    /// Returns the auth domain or a configuration error when it is missing.
    ///
    /// Popup and redirect flows call this before doing any asynchronous work.
    pub fn require_auth_domain(&self) -> Result<&str> {
        self.auth_domain.as_deref().ok_or_else(|| {
            Error::Config(
                "Auth domain is required for popup and redirect operations. \
                 Use .auth_domain() to set it."
                    .to_string(),
            )
        })
    }

    /// Stable per-instance key: `<authDomain>:<apiKey>:<appName>`.
    ///
    /// Used to scope in-memory state (event managers, redirect outcomes) that
    /// must never be shared between auth instances.
    pub fn instance_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.auth_domain.as_deref().unwrap_or_default(),
            self.api_key,
            self.app_name
        )
    }
}

/// Builder for constructing [`AuthConfig`] instances.
#[derive(Debug, Default)]
pub struct AuthConfigBuilder {
    api_key: Option<String>,
    app_name: Option<String>,
    auth_domain: Option<String>,
    prefer_storage_polling: bool,
    timeouts: Timeouts,
}

impl AuthConfigBuilder {
    /// Sets the Web API key (required).
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Sets the app instance name. Defaults to `[DEFAULT]`.
    pub fn app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }

    /// Sets the auth domain.
    pub fn auth_domain(mut self, domain: impl Into<String>) -> Self {
        self.auth_domain = Some(domain.into());
        self
    }

    /// Prefer polling for web storage change detection.
    pub fn prefer_storage_polling(mut self, prefer: bool) -> Self {
        self.prefer_storage_polling = prefer;
        self
    }

    /// Replaces every timeout at once.
    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Sets the popup-closed polling window.
    pub fn popup_poll_window(mut self, min: Duration, max: Duration) -> Self {
        self.timeouts.popup_poll_min = min;
        self.timeouts.popup_poll_max = max;
        self
    }

    /// Sets the grace period granted after a popup is observed closed.
    pub fn popup_closed_grace(mut self, grace: Duration) -> Self {
        self.timeouts.popup_closed_grace = grace;
        self
    }

    /// Sets the sync channel ACK, long ACK and completion timeouts.
    pub fn channel_timeouts(mut self, ack: Duration, long_ack: Duration, completion: Duration) -> Self {
        self.timeouts.ack = ack;
        self.timeouts.long_ack = long_ack;
        self.timeouts.completion = completion;
        self
    }

    /// Builds the configuration, failing fast on missing or invalid values.
    pub fn build(self) -> Result<AuthConfig> {
        let api_key = self.api_key.ok_or_else(|| {
            Error::Config("API key is required. Use .api_key() to set it.".to_string())
        })?;

        let config = AuthConfig {
            api_key,
            app_name: self
                .app_name
                .unwrap_or_else(|| DEFAULT_APP_NAME.to_string()),
            auth_domain: self.auth_domain,
            prefer_storage_polling: self.prefer_storage_polling,
            timeouts: self.timeouts,
        };

        config.validate()?;
        Ok(config)
    }
}
