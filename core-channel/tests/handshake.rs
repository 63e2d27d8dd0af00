//! End-to-end handshake over the in-process transport.

use core_channel::{
    ChannelError, EventHandler, EventType, LocalEndpoint, Receiver, Sender, SettledResult,
};
use futures::FutureExt;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const ACK: Duration = Duration::from_secs(2);
const COMPLETION: Duration = Duration::from_secs(20);

#[tokio::test]
async fn test_key_changed_round_trip() {
    let endpoint = LocalEndpoint::new("https://app.example");
    let receiver = Receiver::new(endpoint.clone());
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = calls.clone();
    let handler: EventHandler = Arc::new(move |_origin, data: Value| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move { Ok(json!({ "keyProcessed": data["key"] == "k1" })) }.boxed()
    });
    receiver.subscribe(EventType::KeyChanged, handler);

    let sender = Sender::new(endpoint, COMPLETION);
    let response = sender
        .send(EventType::KeyChanged, json!({ "key": "k1" }), ACK)
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        response,
        vec![SettledResult::fulfilled(json!({ "keyProcessed": true }))]
    );
}

#[tokio::test(start_paused = true)]
async fn test_no_receiver_is_unsupported_after_ack_timeout() {
    let endpoint = LocalEndpoint::new("https://app.example");
    let sender = Sender::new(endpoint, COMPLETION);

    let started = tokio::time::Instant::now();
    let err = sender
        .send(EventType::KeyChanged, json!({ "key": "k1" }), ACK)
        .await
        .unwrap_err();

    assert!(matches!(err, ChannelError::UnsupportedEvent(_)));
    assert!(started.elapsed() >= ACK);
}

#[tokio::test(start_paused = true)]
async fn test_slow_handler_times_out_after_ack() {
    let endpoint = LocalEndpoint::new("https://app.example");
    let receiver = Receiver::new(endpoint.clone());
    receiver.subscribe(
        EventType::Ping,
        Arc::new(|_origin, _data| {
            async {
                futures::future::pending::<()>().await;
                Ok(Value::Null)
            }
            .boxed()
        }),
    );

    let sender = Sender::new(endpoint, COMPLETION);
    let err = sender
        .send(EventType::Ping, Value::Null, ACK)
        .await
        .unwrap_err();

    assert!(matches!(err, ChannelError::Timeout(_)));
}
