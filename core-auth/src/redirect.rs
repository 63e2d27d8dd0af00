//! # Redirect Operations
//!
//! A redirect completes on a later page load, so its outcome is read at most
//! once per auth instance:
//!
//! - [`RedirectOutcomeCache`] memoises the outcome per auth key. A regular
//!   read consumes it (later reads see `None`); a bypass read, used by session
//!   bootstrap, leaves it in place for the first regular read.
//! - The operation only runs when the pending-redirect flag set before
//!   navigating is still in storage. The flag is cleared as it is read.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, instrument};

use core_persistence::{persistence_key, KeyName};

use crate::error::Result;
use crate::handle::AuthHandle;
use crate::operation::AuthOperation;
use crate::resolver::PopupRedirectResolver;
use crate::types::{AuthEvent, AuthEventType, UserCredential};

/// Event types a redirect operation subscribes to.
pub const REDIRECT_FILTER: [AuthEventType; 4] = [
    AuthEventType::SignInViaRedirect,
    AuthEventType::LinkViaRedirect,
    AuthEventType::ReauthViaRedirect,
    AuthEventType::Unknown,
];

const PENDING_REDIRECT_VALUE: &str = "true";

/// Outcome of the redirect operation of one auth instance.
pub type RedirectOutcome = Result<Option<UserCredential>>;

/// Per-auth-key memo of redirect outcomes.
///
/// Shared by every flow manager of a page so the operation runs at most once
/// per page load. Each key has its own slot, so a redirect still waiting for
/// its event never blocks other auth instances.
#[derive(Default)]
pub struct RedirectOutcomeCache {
    slots: Mutex<HashMap<String, Arc<tokio::sync::Mutex<Option<RedirectOutcome>>>>>,
}

impl RedirectOutcomeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the memoised outcome for `auth_key`, running `execute` on a
    /// miss.
    ///
    /// Concurrent callers for the same key wait for the first one.
    pub async fn outcome_for<F, Fut>(
        &self,
        auth_key: &str,
        bypass_auth_state: bool,
        execute: F,
    ) -> RedirectOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RedirectOutcome>,
    {
        let slot = self
            .slots
            .lock()
            .entry(auth_key.to_string())
            .or_default()
            .clone();

        let mut memo = slot.lock().await;
        let outcome = match memo.as_ref() {
            Some(outcome) => outcome.clone(),
            None => execute().await,
        };

        *memo = if bypass_auth_state {
            Some(outcome.clone())
        } else {
            Some(Ok(None))
        };
        outcome
    }

    /// Forgets the outcome of `auth_key`.
    pub fn reset(&self, auth_key: &str) {
        self.slots.lock().remove(auth_key);
    }
}

fn pending_redirect_key(auth: &dyn AuthHandle) -> String {
    let config = auth.config();
    persistence_key(KeyName::PendingRedirect, &config.api_key, &config.app_name)
}

/// Records that a redirect was started from this page.
pub(crate) async fn set_pending_redirect_status(
    resolver: &dyn PopupRedirectResolver,
    auth: &dyn AuthHandle,
) -> Result<()> {
    resolver
        .resolver_persistence()
        .set(
            &pending_redirect_key(auth),
            Value::String(PENDING_REDIRECT_VALUE.to_string()),
        )
        .await?;
    Ok(())
}

/// Reads and clears the pending-redirect flag. An unavailable backend
/// reads as "no redirect pending".
pub(crate) async fn get_and_clear_pending_redirect_status(
    resolver: &dyn PopupRedirectResolver,
    auth: &dyn AuthHandle,
) -> Result<bool> {
    let persistence = resolver.resolver_persistence();
    if !persistence.is_available().await {
        return Ok(false);
    }

    let key = pending_redirect_key(auth);
    let pending = matches!(
        persistence.get(&key).await?,
        Some(Value::String(value)) if value == PENDING_REDIRECT_VALUE
    );
    persistence.remove(&key).await?;
    Ok(pending)
}

/// Runs the redirect operation if a redirect is pending.
#[instrument(skip(operation), fields(bypass = operation.bypass_auth_state()))]
pub(crate) async fn execute_redirect(operation: Arc<AuthOperation>) -> RedirectOutcome {
    let context = &operation.context;
    let pending =
        get_and_clear_pending_redirect_status(context.resolver.as_ref(), context.auth.as_ref())
            .await?;
    if !pending {
        debug!("No pending redirect");
        return Ok(None);
    }
    operation.execute().await
}

/// Event handling of redirect operations.
pub(crate) async fn on_redirect_event(operation: &Arc<AuthOperation>, event: AuthEvent) {
    match event.event_type {
        AuthEventType::SignInViaRedirect => operation.complete_with_event(event).await,
        AuthEventType::Unknown => {
            debug!("Page load carried no redirect result");
            operation.finish(Ok(None));
        }
        _ => {
            let Some(event_id) = event.event_id.clone() else {
                operation.finish(Ok(None));
                return;
            };
            match operation.context.auth.redirect_user_for_id(&event_id).await {
                Some(user) => {
                    operation.set_user(user);
                    operation.complete_with_event(event).await;
                }
                None => {
                    debug!(event_id = %event_id, "Redirect event does not belong to a known user");
                    operation.finish(Ok(None));
                }
            }
        }
    }
}
