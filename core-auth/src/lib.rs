//! # Popup/Redirect Auth Coordination
//!
//! Coordinates federated sign-in through popup windows and full-page
//! redirects.
//!
//! ## Overview
//!
//! The auth handler page reports completion as an [`AuthEvent`]. The host's
//! [`PopupRedirectResolver`] hands each event to the [`AuthEventManager`] of
//! the auth instance, which drops duplicates and routes the event to the
//! waiting [`AuthOperation`]. Operations settle exactly once, clean up after
//! themselves and return a [`UserCredential`].
//!
//! ## Features
//!
//! - Deduplicated event routing with a single queued redirect event
//! - One live popup at a time, with user-close detection and a grace window
//! - Redirect outcomes read at most once per page load
//! - Session bootstrap that picks up a pending redirect result
//! - Auth-state notifications on the [`EventBus`](core_runtime::events::EventBus)

pub mod error;
pub mod event_manager;
pub mod flows;
pub mod handle;
pub mod idp;
pub mod operation;
pub mod popup;
pub mod redirect;
pub mod resolver;
pub mod session;
pub mod types;

#[cfg(test)]
mod test_support;

pub use error::{AuthError, AuthErrorCode, Result};
pub use event_manager::{AuthEventConsumer, AuthEventManager, EventManagerRegistry};
pub use flows::AuthFlowManager;
pub use handle::AuthHandle;
pub use idp::{IdTokenResponse, IdpClient, IdpRequest, IdpTask, IdpTaskParams};
pub use operation::{AuthOperation, OperationStatus};
pub use popup::PopupSlot;
pub use redirect::{RedirectOutcome, RedirectOutcomeCache, REDIRECT_FILTER};
pub use resolver::PopupRedirectResolver;
pub use session::AuthSession;
pub use types::{
    generate_event_id, AuthEvent, AuthEventError, AuthEventType, AuthProvider, OperationType,
    ProviderInfo, User, UserCredential, EVENT_ID_DIGITS,
};
