//! # Event Bus System
//!
//! Broadcasts auth-state notifications to host shells using
//! `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! The coordination layer settles operations through their own result
//! channels; this bus is the side channel hosts use to observe what happened
//! (a redirect result was picked up, a popup was preempted, a cached user was
//! evicted, a persisted value was migrated between backends). Emission is
//! best-effort: having no subscriber is not an error.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{AuthStateEvent, CoreEvent, EventBus};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(16);
//! let mut subscriber = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Auth(AuthStateEvent::CurrentUserChanged {
//!         uid: Some("uid-1".to_string()),
//!     }))
//!     .ok();
//!
//! let received = subscriber.recv().await.unwrap();
//! assert!(matches!(received, CoreEvent::Auth(_)));
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//! - **`RecvError::Closed`**: All senders have been dropped.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 64;

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Sign-in operation and session events
    Auth(AuthStateEvent),
    /// Storage backend events
    Persistence(PersistenceEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Auth(e) => e.description(),
            CoreEvent::Persistence(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Auth(AuthStateEvent::OperationFailed { .. }) => EventSeverity::Error,
            CoreEvent::Auth(AuthStateEvent::CurrentUserEvicted { .. }) => EventSeverity::Warning,
            CoreEvent::Auth(AuthStateEvent::PopupCancelled { .. }) => EventSeverity::Info,
            CoreEvent::Auth(AuthStateEvent::RedirectResolved { .. }) => EventSeverity::Info,
            CoreEvent::Persistence(PersistenceEvent::Migrated { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

/// Events related to popup/redirect operations and the signed-in user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum AuthStateEvent {
    /// A popup operation was superseded by a newer one.
    PopupCancelled {
        /// Event id correlating the popup with its auth event, if one was issued.
        event_id: Option<String>,
    },
    /// A redirect operation produced its outcome for this page load.
    RedirectResolved {
        /// Uid of the user carried by the credential, `None` for "no result".
        uid: Option<String>,
        /// Whether the outcome was consumed without touching the signed-in user.
        bypass_auth_state: bool,
    },
    /// A popup or redirect operation was rejected.
    OperationFailed {
        /// Stable error code (e.g. `auth/popup-closed-by-user`).
        code: String,
        /// Whether the failure is a user cancellation.
        cancelled: bool,
    },
    /// The signed-in user changed.
    CurrentUserChanged {
        uid: Option<String>,
    },
    /// A cached user failed to reload with a non-network error and was dropped.
    CurrentUserEvicted {
        uid: String,
        code: String,
    },
}

impl AuthStateEvent {
    fn description(&self) -> &str {
        match self {
            AuthStateEvent::PopupCancelled { .. } => "Popup operation cancelled",
            AuthStateEvent::RedirectResolved { .. } => "Redirect result resolved",
            AuthStateEvent::OperationFailed { .. } => "Auth operation failed",
            AuthStateEvent::CurrentUserChanged { .. } => "Current user changed",
            AuthStateEvent::CurrentUserEvicted { .. } => "Cached user evicted",
        }
    }
}

/// Events related to persistence backends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum PersistenceEvent {
    /// A persisted value was copied into a preferred backend.
    Migrated {
        key: String,
        /// Persistence type of the backend the value now lives in.
        to: String,
    },
    /// The active backend for a key was switched by the host.
    BackendChanged {
        key: String,
        from: String,
        to: String,
    },
}

impl PersistenceEvent {
    fn description(&self) -> &str {
        match self {
            PersistenceEvent::Migrated { .. } => "Persisted value migrated",
            PersistenceEvent::BackendChanged { .. } => "Persistence backend changed",
        }
    }
}

/// Central broadcast channel for [`CoreEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
