//! # Auth Event Manager
//!
//! Routes [`AuthEvent`]s handed over by the popup/redirect integration layer
//! to the operations waiting for them.
//!
//! ## Overview
//!
//! - Events already processed are dropped. Processed keys are forgotten all
//!   at once when the configured window has elapsed since the last insertion.
//! - Every registered consumer whose filter contains the event type, and
//!   whose event id is unset or equal to the event's, receives the event in
//!   registration order.
//! - The first redirect-class event the manager ever sees is kept for a
//!   consumer registering later when nobody claimed it. Only one such event
//!   is ever queued.
//!
//! Consumers are invoked after the internal lock is released, so a consumer
//! may register or unregister from inside its callback.

use bridge_traits::platform::PlatformSendSync;
use bridge_traits::time::Clock;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::AuthError;
use crate::types::{AuthEvent, AuthEventType};

/// Something waiting for auth events.
pub trait AuthEventConsumer: PlatformSendSync {
    /// Event types this consumer accepts.
    fn filter(&self) -> Vec<AuthEventType>;

    /// Event id this consumer is bound to; `None` accepts any id.
    fn event_id(&self) -> Option<String>;

    fn on_auth_event(&self, event: AuthEvent);

    fn on_error(&self, error: AuthError);
}

fn same_consumer(a: &Arc<dyn AuthEventConsumer>, b: &Arc<dyn AuthEventConsumer>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

fn is_event_for_consumer(event: &AuthEvent, consumer: &dyn AuthEventConsumer) -> bool {
    let event_id_matches = match consumer.event_id() {
        None => true,
        Some(expected) => event.event_id.as_deref() == Some(expected.as_str()),
    };
    event_id_matches && consumer.filter().contains(&event.event_type)
}

fn send_to_consumer(event: &AuthEvent, consumer: &dyn AuthEventConsumer) {
    match &event.error {
        Some(error) if !event.is_null_redirect() => {
            consumer.on_error(AuthError::from_event_error(error));
        }
        _ => consumer.on_auth_event(event.clone()),
    }
}

struct ManagerState {
    consumers: Vec<Arc<dyn AuthEventConsumer>>,
    processed: HashSet<String>,
    last_processed_at: DateTime<Utc>,
    queued_redirect_event: Option<AuthEvent>,
    has_handled_potential_redirect: bool,
}

impl ManagerState {
    fn has_been_handled(&mut self, key: &str, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        if now - self.last_processed_at >= window {
            self.processed.clear();
        }
        self.processed.contains(key)
    }

    fn record(&mut self, key: String, now: DateTime<Utc>) {
        self.processed.insert(key);
        self.last_processed_at = now;
    }
}

/// Per-auth-instance event router.
pub struct AuthEventManager {
    auth_key: String,
    clock: Arc<dyn Clock>,
    dedup_window: chrono::Duration,
    state: Mutex<ManagerState>,
}

impl AuthEventManager {
    pub fn new(auth_key: impl Into<String>, clock: Arc<dyn Clock>, dedup_window: Duration) -> Self {
        let now = clock.now();
        Self {
            auth_key: auth_key.into(),
            clock,
            dedup_window: chrono::Duration::from_std(dedup_window)
                .unwrap_or(chrono::Duration::MAX),
            state: Mutex::new(ManagerState {
                consumers: Vec::new(),
                processed: HashSet::new(),
                last_processed_at: now,
                queued_redirect_event: None,
                has_handled_potential_redirect: false,
            }),
        }
    }

    pub fn auth_key(&self) -> &str {
        &self.auth_key
    }

    /// Adds `consumer`, delivering the queued redirect event first if it
    /// matches.
    pub fn register_consumer(&self, consumer: Arc<dyn AuthEventConsumer>) {
        let delivery = {
            let mut state = self.state.lock();
            state.consumers.push(consumer.clone());

            let matches = state
                .queued_redirect_event
                .as_ref()
                .is_some_and(|event| is_event_for_consumer(event, consumer.as_ref()));
            if matches {
                let event = state.queued_redirect_event.take();
                if let Some(event) = &event {
                    state.record(event.dedup_key(), self.clock.now());
                }
                event
            } else {
                None
            }
        };

        if let Some(event) = delivery {
            debug!(auth_key = %self.auth_key, event_type = %event.event_type, "Delivering queued redirect event");
            send_to_consumer(&event, consumer.as_ref());
        }
    }

    pub fn unregister_consumer(&self, consumer: &Arc<dyn AuthEventConsumer>) {
        self.state
            .lock()
            .consumers
            .retain(|registered| !same_consumer(registered, consumer));
    }

    pub fn consumer_count(&self) -> usize {
        self.state.lock().consumers.len()
    }

    pub fn has_queued_redirect_event(&self) -> bool {
        self.state.lock().queued_redirect_event.is_some()
    }

    /// Routes `event`. Returns `true` when at least one consumer received it
    /// or it was queued.
    pub fn on_event(&self, event: AuthEvent) -> bool {
        let key = event.dedup_key();
        let now = self.clock.now();

        let (targets, handled) = {
            let mut state = self.state.lock();
            if state.has_been_handled(&key, now, self.dedup_window) {
                trace!(auth_key = %self.auth_key, key = %key, "Dropping duplicate auth event");
                return false;
            }

            let targets: Vec<_> = state
                .consumers
                .iter()
                .filter(|consumer| is_event_for_consumer(&event, consumer.as_ref()))
                .cloned()
                .collect();
            let mut handled = !targets.is_empty();
            if handled {
                state.record(key.clone(), now);
            }

            if !state.has_handled_potential_redirect && event.is_redirect_class() {
                state.has_handled_potential_redirect = true;
                if !handled {
                    debug!(auth_key = %self.auth_key, event_type = %event.event_type, "Queueing unclaimed redirect event");
                    state.queued_redirect_event = Some(event.clone());
                    handled = true;
                }
            }
            (targets, handled)
        };

        for consumer in &targets {
            send_to_consumer(&event, consumer.as_ref());
        }
        handled
    }
}

/// Memoises one [`AuthEventManager`] per auth instance key.
///
/// Resolver implementations hand out managers from here so every operation
/// of an auth instance shares the same dedup cache and queued event.
pub struct EventManagerRegistry {
    clock: Arc<dyn Clock>,
    dedup_window: Duration,
    managers: Mutex<HashMap<String, Arc<AuthEventManager>>>,
}

impl EventManagerRegistry {
    pub fn new(clock: Arc<dyn Clock>, dedup_window: Duration) -> Self {
        Self {
            clock,
            dedup_window,
            managers: Mutex::new(HashMap::new()),
        }
    }

    pub fn manager_for(&self, auth_key: &str) -> Arc<AuthEventManager> {
        self.managers
            .lock()
            .entry(auth_key.to_string())
            .or_insert_with(|| {
                Arc::new(AuthEventManager::new(
                    auth_key,
                    self.clock.clone(),
                    self.dedup_window,
                ))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthErrorCode;
    use bridge_traits::time::ManualClock;

    const WINDOW: Duration = Duration::from_secs(600);

    #[derive(Default)]
    struct RecordingConsumer {
        filter: Vec<AuthEventType>,
        event_id: Option<String>,
        events: Mutex<Vec<AuthEvent>>,
        errors: Mutex<Vec<AuthError>>,
    }

    impl RecordingConsumer {
        fn new(filter: Vec<AuthEventType>, event_id: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                filter,
                event_id: event_id.map(str::to_string),
                ..Default::default()
            })
        }

        fn event_count(&self) -> usize {
            self.events.lock().len()
        }
    }

    impl AuthEventConsumer for RecordingConsumer {
        fn filter(&self) -> Vec<AuthEventType> {
            self.filter.clone()
        }

        fn event_id(&self) -> Option<String> {
            self.event_id.clone()
        }

        fn on_auth_event(&self, event: AuthEvent) {
            self.events.lock().push(event);
        }

        fn on_error(&self, error: AuthError) {
            self.errors.lock().push(error);
        }
    }

    fn manager() -> (AuthEventManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (
            AuthEventManager::new("domain:key:[DEFAULT]", clock.clone(), WINDOW),
            clock,
        )
    }

    fn redirect_filter() -> Vec<AuthEventType> {
        vec![
            AuthEventType::SignInViaRedirect,
            AuthEventType::LinkViaRedirect,
            AuthEventType::ReauthViaRedirect,
            AuthEventType::Unknown,
        ]
    }

    #[test]
    fn test_duplicate_event_is_dropped() {
        let (manager, _) = manager();
        let consumer = RecordingConsumer::new(vec![AuthEventType::SignInViaPopup], None);
        manager.register_consumer(consumer.clone());

        let event = AuthEvent::new(AuthEventType::SignInViaPopup).with_event_id("e1");
        assert!(manager.on_event(event.clone()));
        assert!(!manager.on_event(event));
        assert_eq!(consumer.event_count(), 1);
    }

    #[test]
    fn test_duplicate_redirect_keyed_by_session_id() {
        let (manager, _) = manager();
        let consumer = RecordingConsumer::new(redirect_filter(), None);
        manager.register_consumer(consumer.clone());

        let event = AuthEvent::new(AuthEventType::SignInViaRedirect).with_session_id("s1");
        assert!(manager.on_event(event.clone()));
        assert!(!manager.on_event(event));
        assert_eq!(consumer.event_count(), 1);
    }

    #[test]
    fn test_dedup_cache_cleared_after_window() {
        let (manager, clock) = manager();
        let consumer = RecordingConsumer::new(vec![AuthEventType::SignInViaPopup], None);
        manager.register_consumer(consumer.clone());

        let event = AuthEvent::new(AuthEventType::SignInViaPopup).with_event_id("e1");
        assert!(manager.on_event(event.clone()));

        clock.advance(chrono::Duration::minutes(9));
        assert!(!manager.on_event(event.clone()));

        clock.advance(chrono::Duration::minutes(1));
        assert!(manager.on_event(event));
        assert_eq!(consumer.event_count(), 2);
    }

    #[test]
    fn test_event_id_must_match() {
        let (manager, _) = manager();
        let consumer = RecordingConsumer::new(vec![AuthEventType::SignInViaPopup], Some("mine"));
        manager.register_consumer(consumer.clone());

        let other = AuthEvent::new(AuthEventType::SignInViaPopup).with_event_id("other");
        assert!(!manager.on_event(other));
        let missing = AuthEvent::new(AuthEventType::SignInViaPopup);
        assert!(!manager.on_event(missing));
        let mine = AuthEvent::new(AuthEventType::SignInViaPopup).with_event_id("mine");
        assert!(manager.on_event(mine));
        assert_eq!(consumer.event_count(), 1);
    }

    #[test]
    fn test_error_routed_to_on_error() {
        let (manager, _) = manager();
        let consumer = RecordingConsumer::new(vec![AuthEventType::SignInViaPopup], None);
        manager.register_consumer(consumer.clone());

        let event = AuthEvent::new(AuthEventType::SignInViaPopup)
            .with_event_id("e1")
            .with_error("auth/popup-blocked");
        assert!(manager.on_event(event));
        assert_eq!(consumer.event_count(), 0);
        let errors = consumer.errors.lock();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].has_code(AuthErrorCode::PopupBlocked));
    }

    #[test]
    fn test_null_redirect_goes_to_on_auth_event() {
        let (manager, _) = manager();
        let consumer = RecordingConsumer::new(redirect_filter(), None);
        manager.register_consumer(consumer.clone());

        assert!(manager.on_event(AuthEvent::no_auth_event()));
        assert_eq!(consumer.event_count(), 1);
        assert!(consumer.errors.lock().is_empty());
    }

    #[test]
    fn test_single_redirect_event_queued() {
        let (manager, _) = manager();

        let first = AuthEvent::new(AuthEventType::SignInViaRedirect).with_event_id("r1");
        let second = AuthEvent::new(AuthEventType::SignInViaRedirect).with_event_id("r2");
        assert!(manager.on_event(first.clone()));
        assert!(!manager.on_event(second));
        assert!(manager.has_queued_redirect_event());

        let consumer = RecordingConsumer::new(redirect_filter(), None);
        manager.register_consumer(consumer.clone());
        assert_eq!(*consumer.events.lock(), vec![first.clone()]);
        assert!(!manager.has_queued_redirect_event());

        // Delivered from the queue, so its key is now recorded.
        assert!(!manager.on_event(first));
    }

    #[test]
    fn test_queued_event_waits_for_matching_consumer() {
        let (manager, _) = manager();
        assert!(manager.on_event(AuthEvent::new(AuthEventType::LinkViaRedirect)));

        let popup = RecordingConsumer::new(vec![AuthEventType::SignInViaPopup], None);
        manager.register_consumer(popup.clone());
        assert_eq!(popup.event_count(), 0);
        assert!(manager.has_queued_redirect_event());

        let redirect = RecordingConsumer::new(redirect_filter(), None);
        manager.register_consumer(redirect.clone());
        assert_eq!(redirect.event_count(), 1);
    }

    #[test]
    fn test_non_redirect_unclaimed_event_not_queued() {
        let (manager, _) = manager();
        assert!(!manager.on_event(AuthEvent::new(AuthEventType::SignInViaPopup)));
        assert!(!manager.on_event(AuthEvent::new(AuthEventType::Unknown)));
        assert!(!manager.has_queued_redirect_event());
    }

    #[test]
    fn test_unregistered_consumer_receives_nothing() {
        let (manager, _) = manager();
        let consumer = RecordingConsumer::new(vec![AuthEventType::SignInViaPopup], None);
        let handle: Arc<dyn AuthEventConsumer> = consumer.clone();
        manager.register_consumer(handle.clone());
        manager.unregister_consumer(&handle);

        assert!(!manager.on_event(AuthEvent::new(AuthEventType::SignInViaPopup)));
        assert_eq!(consumer.event_count(), 0);
        assert_eq!(manager.consumer_count(), 0);
    }

    #[test]
    fn test_consumers_receive_in_registration_order() {
        let (manager, _) = manager();
        let order = Arc::new(Mutex::new(Vec::new()));

        struct Ordered(&'static str, Arc<Mutex<Vec<&'static str>>>);
        impl AuthEventConsumer for Ordered {
            fn filter(&self) -> Vec<AuthEventType> {
                vec![AuthEventType::SignInViaPopup]
            }
            fn event_id(&self) -> Option<String> {
                None
            }
            fn on_auth_event(&self, _event: AuthEvent) {
                self.1.lock().push(self.0);
            }
            fn on_error(&self, _error: AuthError) {}
        }

        manager.register_consumer(Arc::new(Ordered("a", order.clone())));
        manager.register_consumer(Arc::new(Ordered("b", order.clone())));
        manager.on_event(AuthEvent::new(AuthEventType::SignInViaPopup));
        assert_eq!(*order.lock(), vec!["a", "b"]);
    }

    #[test]
    fn test_registry_memoises_per_key() {
        let registry = EventManagerRegistry::new(Arc::new(ManualClock::default()), WINDOW);
        let a = registry.manager_for("k1");
        let b = registry.manager_for("k1");
        let c = registry.manager_for("k2");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
