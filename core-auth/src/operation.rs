//! # Popup/Redirect Operation
//!
//! One sign-in, link or reauthenticate attempt, from `execute()` until it
//! settles.
//!
//! ## Lifecycle
//!
//! ```text
//! Created --execute()--> Executing --resolve--> Resolved
//!                                  \--reject---> Rejected
//! ```
//!
//! `execute()` obtains the event manager from the resolver, runs the
//! kind-specific setup (opening the popup for popup operations) and then
//! registers the operation as an event consumer. A failure in any of these
//! steps rejects without registering. The first settle unregisters the
//! operation, runs its clean-up and releases the result to the caller.
//! Event tasks, timers and preemption race to settle; every settle after the
//! first is ignored.

use core_runtime::config::Timeouts;
use core_runtime::events::EventBus;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{AuthError, Result};
use crate::event_manager::{AuthEventConsumer, AuthEventManager};
use crate::handle::AuthHandle;
use crate::idp::{IdpClient, IdpTask, IdpTaskParams};
use crate::popup::PopupOperation;
use crate::redirect;
use crate::resolver::PopupRedirectResolver;
use crate::types::{AuthEvent, AuthEventType, User, UserCredential};

/// Spawns `future` on the current Tokio runtime.
///
/// Without a runtime the future is driven to completion on the calling
/// thread when `inline` is set, and dropped otherwise.
pub(crate) fn spawn_task<F>(future: F, inline: bool) -> Option<JoinHandle<()>>
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => Some(handle.spawn(future)),
        Err(_) if inline => {
            futures::executor::block_on(future);
            None
        }
        Err(_) => {
            warn!("No async runtime available, background task not started");
            None
        }
    }
}

/// Dependencies shared by every operation of an auth instance.
#[derive(Clone)]
pub(crate) struct OperationContext {
    pub auth: Arc<dyn AuthHandle>,
    pub resolver: Arc<dyn PopupRedirectResolver>,
    pub idp: Arc<dyn IdpClient>,
    pub event_bus: EventBus,
    pub timeouts: Timeouts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Created,
    Executing,
    Resolved,
    Rejected,
}

enum OperationState {
    Created,
    Executing {
        manager: Option<Arc<AuthEventManager>>,
        result: oneshot::Sender<Result<Option<UserCredential>>>,
    },
    Resolved,
    Rejected,
}

impl OperationState {
    fn status(&self) -> OperationStatus {
        match self {
            OperationState::Created => OperationStatus::Created,
            OperationState::Executing { .. } => OperationStatus::Executing,
            OperationState::Resolved => OperationStatus::Resolved,
            OperationState::Rejected => OperationStatus::Rejected,
        }
    }
}

pub(crate) enum OperationKind {
    Popup(PopupOperation),
    Redirect,
}

pub struct AuthOperation {
    pub(crate) context: OperationContext,
    filter: Vec<AuthEventType>,
    user: Mutex<Option<User>>,
    bypass_auth_state: bool,
    pub(crate) kind: OperationKind,
    state: Mutex<OperationState>,
    this: Weak<AuthOperation>,
}

impl AuthOperation {
    pub(crate) fn new(
        context: OperationContext,
        filter: Vec<AuthEventType>,
        user: Option<User>,
        bypass_auth_state: bool,
        kind: OperationKind,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            context,
            filter,
            user: Mutex::new(user),
            bypass_auth_state,
            kind,
            state: Mutex::new(OperationState::Created),
            this: this.clone(),
        })
    }

    pub fn status(&self) -> OperationStatus {
        self.state.lock().status()
    }

    pub fn is_pending(&self) -> bool {
        self.status() == OperationStatus::Executing
    }

    pub fn bypass_auth_state(&self) -> bool {
        self.bypass_auth_state
    }

    pub(crate) fn filter_types(&self) -> &[AuthEventType] {
        &self.filter
    }

    pub(crate) fn set_user(&self, user: User) {
        *self.user.lock() = Some(user);
    }

    /// Runs the operation and waits for it to settle.
    pub async fn execute(self: &Arc<Self>) -> Result<Option<UserCredential>> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock();
            if !matches!(*state, OperationState::Created) {
                return Err(AuthError::internal("operation executed twice"));
            }
            *state = OperationState::Executing {
                manager: None,
                result: tx,
            };
        }

        match self.prepare().await {
            Ok(manager) => self.register_with(&manager),
            Err(error) => {
                debug!(code = %error.code(), "Operation failed before registering");
                self.reject_if_pending(error);
            }
        }

        rx.await
            .unwrap_or_else(|_| Err(AuthError::internal("operation dropped before settling")))
    }

    async fn prepare(self: &Arc<Self>) -> Result<Arc<AuthEventManager>> {
        let manager = self
            .context
            .resolver
            .initialize(self.context.auth.clone())
            .await?;
        if let OperationState::Executing { manager: slot, .. } = &mut *self.state.lock() {
            *slot = Some(manager.clone());
        }

        if let OperationKind::Popup(popup) = &self.kind {
            popup.on_execution(self).await?;
        }
        Ok(manager)
    }

    fn register_with(self: &Arc<Self>, manager: &Arc<AuthEventManager>) {
        if !self.is_pending() {
            return;
        }
        let consumer: Arc<dyn AuthEventConsumer> = self.clone();
        manager.register_consumer(consumer.clone());
        // Settled concurrently: its unregister may have run before ours.
        if !self.is_pending() {
            manager.unregister_consumer(&consumer);
        }
    }

    fn settle(&self, outcome: Result<Option<UserCredential>>) -> bool {
        let next = if outcome.is_ok() {
            OperationState::Resolved
        } else {
            OperationState::Rejected
        };
        let previous = {
            let mut state = self.state.lock();
            if !matches!(*state, OperationState::Executing { .. }) {
                return false;
            }
            std::mem::replace(&mut *state, next)
        };
        let OperationState::Executing { manager, result } = previous else {
            return false;
        };

        if let (Some(manager), Some(this)) = (manager, self.this.upgrade()) {
            let consumer: Arc<dyn AuthEventConsumer> = this;
            manager.unregister_consumer(&consumer);
        }
        self.clean_up();
        if result.send(outcome).is_err() {
            trace!("Operation result dropped by caller");
        }
        true
    }

    /// Rejects unless already settled. Used by timers and preemption, which
    /// race the normal completion path.
    pub(crate) fn reject_if_pending(&self, error: AuthError) -> bool {
        self.settle(Err(error))
    }

    /// Settles with the outcome of an event task, unless the operation was
    /// settled while the task ran.
    pub(crate) fn finish(&self, outcome: Result<Option<UserCredential>>) {
        if !self.settle(outcome) {
            debug!("Operation settled while its event was being processed");
        }
    }

    fn clean_up(&self) {
        if let OperationKind::Popup(popup) = &self.kind {
            popup.clean_up(self);
        }
    }

    async fn handle_auth_event(self: Arc<Self>, event: AuthEvent) {
        match &self.kind {
            OperationKind::Popup(_) => self.complete_with_event(event).await,
            OperationKind::Redirect => redirect::on_redirect_event(&self, event).await,
        }
    }

    /// Completes the operation with the idp task matching the event type.
    pub(crate) async fn complete_with_event(&self, event: AuthEvent) {
        if let Some(error) = &event.error {
            self.finish(Err(AuthError::from_event_error(error)));
            return;
        }

        let task = match IdpTask::for_event(event.event_type) {
            Ok(task) => task,
            Err(error) => {
                self.finish(Err(error));
                return;
            }
        };
        let params = IdpTaskParams {
            auth: self.context.auth.clone(),
            idp: self.context.idp.clone(),
            request_uri: event.url_response.unwrap_or_default(),
            session_id: event.session_id,
            tenant_id: event.tenant_id,
            post_body: event.post_body,
            user: self.user.lock().clone(),
            bypass_auth_state: self.bypass_auth_state,
        };
        let outcome = task.run(params).await.map(Some);
        self.finish(outcome);
    }
}

impl AuthEventConsumer for AuthOperation {
    fn filter(&self) -> Vec<AuthEventType> {
        self.filter.clone()
    }

    fn event_id(&self) -> Option<String> {
        match &self.kind {
            OperationKind::Popup(popup) => popup.event_id(),
            OperationKind::Redirect => None,
        }
    }

    fn on_auth_event(&self, event: AuthEvent) {
        if let Some(this) = self.this.upgrade() {
            spawn_task(this.handle_auth_event(event), true);
        }
    }

    fn on_error(&self, error: AuthError) {
        self.reject_if_pending(error);
    }
}
