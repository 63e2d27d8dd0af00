//! Restoring the signed-in user on start-up.

mod common;

use common::{auth_events, Page};
use core_auth::{AuthError, AuthErrorCode, AuthHandle, User};
use core_persistence::PersistenceBackend;
use core_runtime::events::AuthStateEvent;
use std::sync::atomic::Ordering;
use std::sync::Arc;

#[tokio::test]
async fn test_bootstrap_without_user() {
    let page = Page::new();
    assert!(!page.session.is_initialized());

    page.start().await;
    assert!(page.session.is_initialized());
    assert!(page.session.current_user().is_none());
    assert_eq!(page.idp.reloads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_bootstrap_reloads_stored_user() {
    let page = Page::new();
    page.store_user(&User::new("u1")).await;
    page.idp.link_on_reload("password");
    let mut events = page.events.subscribe();

    page.start().await;
    let current = page.session.current_user().unwrap();
    assert_eq!(current.uid, "u1");
    assert!(current.is_linked_to("password"));
    assert!(page.stored_user().await.unwrap().is_linked_to("password"));
    assert!(auth_events(&mut events).contains(&AuthStateEvent::CurrentUserChanged {
        uid: Some("u1".to_string()),
    }));
}

#[tokio::test]
async fn test_bootstrap_keeps_cached_user_when_offline() {
    let page = Page::new();
    page.store_user(&User::new("u1")).await;
    page.idp
        .fail_reload_with(AuthError::new(AuthErrorCode::NetworkRequestFailed));
    let mut events = page.events.subscribe();

    page.start().await;
    assert_eq!(
        page.session.current_user().map(|u| u.uid),
        Some("u1".to_string())
    );
    assert!(!auth_events(&mut events)
        .iter()
        .any(|event| matches!(event, AuthStateEvent::CurrentUserEvicted { .. })));
}

#[tokio::test]
async fn test_bootstrap_evicts_user_on_reload_error() {
    let page = Page::new();
    page.store_user(&User::new("u1")).await;
    page.idp.fail_reload_with(AuthError::Provider {
        code: "user-token-expired".to_string(),
        message: "The user's credential is no longer valid.".to_string(),
    });
    let mut events = page.events.subscribe();

    page.start().await;
    assert!(page.session.current_user().is_none());
    assert!(page.stored_user().await.is_none());
    assert!(auth_events(&mut events).contains(&AuthStateEvent::CurrentUserEvicted {
        uid: "u1".to_string(),
        code: "auth/user-token-expired".to_string(),
    }));
}

#[tokio::test]
async fn test_bootstrap_ignores_malformed_user() {
    let page = Page::new();
    page.storage
        .set(&common::user_key(), serde_json::json!(["not", "a", "user"]))
        .await
        .unwrap();

    page.start().await;
    assert!(page.session.current_user().is_none());
}

#[tokio::test]
async fn test_initialize_twice_fails() {
    let page = Page::new();
    page.start().await;

    let hierarchy: Vec<Arc<dyn PersistenceBackend>> = vec![page.storage.clone()];
    let error = page.session.initialize(&hierarchy, None).await.unwrap_err();
    assert!(error.has_code(AuthErrorCode::InternalError));
}

#[tokio::test]
async fn test_session_without_flows() {
    let page = Page::new();
    page.store_user(&User::new("u1")).await;

    let hierarchy: Vec<Arc<dyn PersistenceBackend>> = vec![page.storage.clone()];
    page.session.initialize(&hierarchy, None).await.unwrap();
    assert_eq!(
        page.session.current_user().map(|u| u.uid),
        Some("u1".to_string())
    );

    page.session.sign_out().await.unwrap();
    assert!(page.session.current_user().is_none());
}

#[tokio::test]
async fn test_sign_out_clears_user() {
    let page = Page::new();
    page.store_user(&User::new("u1")).await;
    page.start().await;
    let mut events = page.events.subscribe();

    page.session.sign_out().await.unwrap();
    assert!(page.session.current_user().is_none());
    assert!(page.stored_user().await.is_none());
    assert_eq!(
        auth_events(&mut events),
        vec![AuthStateEvent::CurrentUserChanged { uid: None }]
    );
}

#[tokio::test]
async fn test_persist_user_if_current_ignores_other_users() {
    let page = Page::new();
    page.store_user(&User::new("u1")).await;
    page.start().await;

    let mut other = User::new("u2");
    other.id_token = Some("u2-token".to_string());
    page.session.persist_user_if_current(&other).await.unwrap();
    assert_eq!(page.stored_user().await.map(|u| u.uid), Some("u1".to_string()));

    let mut refreshed = User::new("u1");
    refreshed.id_token = Some("fresh".to_string());
    page.session.persist_user_if_current(&refreshed).await.unwrap();
    assert_eq!(
        page.stored_user().await.and_then(|u| u.id_token),
        Some("fresh".to_string())
    );
}

#[tokio::test]
async fn test_waiters_resume_after_bootstrap() {
    let page = Page::new();
    let session = page.session.clone();
    let waiter = tokio::spawn(async move {
        session.wait_initialized().await;
        session.current_user().map(|u| u.uid)
    });

    page.store_user(&User::new("u1")).await;
    page.start().await;
    assert_eq!(waiter.await.unwrap(), Some("u1".to_string()));
}
