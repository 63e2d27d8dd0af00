//! # Popup Operations
//!
//! Popup specifics of [`AuthOperation`]:
//!
//! - Only one popup operation is live per [`PopupSlot`]. Starting a new one
//!   rejects the previous one with `auth/cancelled-popup-request` before the
//!   new one opens its window.
//! - After the window opens, origin validation and the iframe web-storage
//!   check run in the background and reject the operation on failure.
//! - The window is polled on a randomised, growing delay. Once it is seen
//!   closed, a grace period lets a late auth event win before the operation
//!   rejects with `auth/popup-closed-by-user`.

use bridge_traits::popup::PopupWindow;
use core_runtime::config::Timeouts;
use core_runtime::events::{AuthStateEvent, CoreEvent};
use parking_lot::Mutex;
use rand::Rng;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::{AuthError, AuthErrorCode, Result};
use crate::operation::{spawn_task, AuthOperation, OperationKind};
use crate::types::{generate_event_id, AuthProvider, EVENT_ID_DIGITS};

/// Holder of the live popup operation.
#[derive(Default)]
pub struct PopupSlot {
    current: Mutex<Option<Weak<AuthOperation>>>,
}

impl PopupSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `operation` the live popup, cancelling the previous one.
    pub(crate) fn replace(&self, operation: &Arc<AuthOperation>) {
        let previous = self.current.lock().replace(Arc::downgrade(operation));
        if let Some(previous) = previous.and_then(|weak| weak.upgrade()) {
            previous.cancel_popup();
        }
    }

    pub(crate) fn clear_if_current(&self, operation: &AuthOperation) {
        let mut current = self.current.lock();
        let is_current = current
            .as_ref()
            .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), operation));
        if is_current {
            *current = None;
        }
    }

    pub fn is_occupied(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .and_then(Weak::upgrade)
            .is_some_and(|operation| operation.is_pending())
    }
}

/// Delay before the next closed-window check: uniform between `min` and
/// `min * 2^attempt`, capped at `max`.
pub(crate) fn poll_delay(min: Duration, max: Duration, attempt: u32) -> Duration {
    let ceiling = min
        .saturating_mul(1u32 << attempt.min(16))
        .min(max)
        .max(min);
    let low = min.as_millis() as u64;
    let high = ceiling.as_millis() as u64;
    Duration::from_millis(rand::thread_rng().gen_range(low..=high))
}

pub(crate) struct PopupOperation {
    provider: AuthProvider,
    slot: Arc<PopupSlot>,
    timeouts: Timeouts,
    window: Mutex<Option<Arc<dyn PopupWindow>>>,
    event_id: Mutex<Option<String>>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl PopupOperation {
    pub fn new(provider: AuthProvider, slot: Arc<PopupSlot>, timeouts: Timeouts) -> Self {
        Self {
            provider,
            slot,
            timeouts,
            window: Mutex::new(None),
            event_id: Mutex::new(None),
            poller: Mutex::new(None),
        }
    }

    pub fn event_id(&self) -> Option<String> {
        self.event_id.lock().clone()
    }

    #[instrument(skip(self, operation), fields(provider = %self.provider.provider_id))]
    pub async fn on_execution(&self, operation: &Arc<AuthOperation>) -> Result<()> {
        let [event_type] = operation.filter_types() else {
            return Err(AuthError::internal("popup operations handle exactly one event type"));
        };
        let context = &operation.context;

        let event_id = generate_event_id("", EVENT_ID_DIGITS);
        let window = context
            .resolver
            .open_popup(context.auth.clone(), &self.provider, *event_type, &event_id)
            .await?;
        *self.event_id.lock() = Some(event_id.clone());

        if !operation.is_pending() {
            // Cancelled while the window was opening.
            window.close();
            return Ok(());
        }
        *self.window.lock() = Some(window.clone());
        debug!(event_id = %event_id, "Popup opened");

        self.spawn_environment_checks(operation);
        self.poll_user_cancellation(operation, window);
        Ok(())
    }

    fn spawn_environment_checks(&self, operation: &Arc<AuthOperation>) {
        let context = operation.context.clone();
        let weak = Arc::downgrade(operation);
        spawn_task(
            async move {
                if let Err(error) = context.resolver.validate_origin(context.auth.clone()).await {
                    warn!(code = %error.code(), "Origin validation failed");
                    if let Some(operation) = weak.upgrade() {
                        operation.reject_if_pending(error);
                    }
                }
            },
            false,
        );

        let context = operation.context.clone();
        let weak = Arc::downgrade(operation);
        spawn_task(
            async move {
                let supported = context
                    .resolver
                    .is_iframe_web_storage_supported(context.auth.clone())
                    .await;
                if !supported {
                    warn!("Iframe web storage unsupported");
                    if let Some(operation) = weak.upgrade() {
                        operation.reject_if_pending(AuthError::new(
                            AuthErrorCode::WebStorageUnsupported,
                        ));
                    }
                }
            },
            false,
        );
    }

    fn poll_user_cancellation(&self, operation: &Arc<AuthOperation>, window: Arc<dyn PopupWindow>) {
        let weak = Arc::downgrade(operation);
        let Timeouts {
            popup_poll_min,
            popup_poll_max,
            popup_closed_grace,
            ..
        } = self.timeouts;

        let task = spawn_task(
            async move {
                let mut attempt = 0u32;
                loop {
                    if window.is_closed() {
                        debug!(grace_ms = popup_closed_grace.as_millis() as u64, "Popup closed, waiting for a late auth event");
                        tokio::time::sleep(popup_closed_grace).await;
                        if let Some(operation) = weak.upgrade() {
                            operation.reject_if_pending(AuthError::new(
                                AuthErrorCode::PopupClosedByUser,
                            ));
                        }
                        return;
                    }
                    tokio::time::sleep(poll_delay(popup_poll_min, popup_poll_max, attempt)).await;
                    attempt = attempt.saturating_add(1);
                }
            },
            false,
        );

        if let Some(task) = task {
            if operation.is_pending() {
                *self.poller.lock() = Some(task);
            } else {
                task.abort();
            }
        }
    }

    pub fn clean_up(&self, operation: &AuthOperation) {
        if let Some(window) = self.window.lock().take() {
            window.close();
        }
        if let Some(task) = self.poller.lock().take() {
            task.abort();
        }
        self.slot.clear_if_current(operation);
    }
}

impl AuthOperation {
    /// Rejects a superseded popup operation.
    pub(crate) fn cancel_popup(&self) {
        let event_id = match &self.kind {
            OperationKind::Popup(popup) => popup.event_id(),
            OperationKind::Redirect => return,
        };
        if self.reject_if_pending(AuthError::new(AuthErrorCode::ExpiredPopupRequest)) {
            info!(event_id = ?event_id, "Popup operation superseded by a newer one");
            self.context
                .event_bus
                .emit(CoreEvent::Auth(AuthStateEvent::PopupCancelled { event_id }))
                .ok();
        }
    }
}
