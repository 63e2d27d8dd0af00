//! Receiving side of the ACK/DONE handshake.

use bridge_traits::messaging::{IncomingMessage, MessageHandler, MessageSource};
use futures::future::{join_all, BoxFuture};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

use crate::protocol::{EventType, SettledResult, SyncMessage, SyncReply};

/// Future returned by an [`EventHandler`].
pub type HandlerFuture = BoxFuture<'static, std::result::Result<Value, String>>;

/// Handler invoked with the sender's origin and the message data.
pub type EventHandler = Arc<dyn Fn(String, Value) -> HandlerFuture + Send + Sync>;

/// Dispatches inbound sync messages to per-type handler sets.
///
/// The receiver only listens on its [`MessageSource`] while it has at least
/// one handler: the source handler is installed by the first
/// [`subscribe`](Self::subscribe) and removed when the last handler goes away.
pub struct Receiver {
    source: Arc<dyn MessageSource>,
    handlers: Mutex<HashMap<EventType, Vec<EventHandler>>>,
    this: Weak<Receiver>,
}

impl Receiver {
    pub fn new(source: Arc<dyn MessageSource>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            source,
            handlers: Mutex::new(HashMap::new()),
            this: this.clone(),
        })
    }

    /// Whether the receiver is currently attached to its source.
    pub fn is_listening(&self) -> bool {
        !self.handlers.lock().is_empty()
    }

    /// Add `handler` for `event_type`.
    pub fn subscribe(&self, event_type: EventType, handler: EventHandler) {
        let attach = {
            let mut handlers = self.handlers.lock();
            let attach = handlers.is_empty();
            handlers.entry(event_type).or_default().push(handler);
            attach
        };

        if attach {
            let this = self.this.clone();
            let listener: MessageHandler = Arc::new(move |message| {
                if let Some(receiver) = this.upgrade() {
                    receiver.handle_message(message);
                }
            });
            self.source.set_message_handler(Some(listener));
            debug!(event_type = %event_type, "Receiver attached to message source");
        }
    }

    /// Remove `handler` for `event_type`, or every handler of that type when
    /// `handler` is `None`.
    pub fn unsubscribe(&self, event_type: EventType, handler: Option<&EventHandler>) {
        let detach = {
            let mut handlers = self.handlers.lock();
            match handler {
                Some(handler) => {
                    if let Some(set) = handlers.get_mut(&event_type) {
                        set.retain(|h| !Arc::ptr_eq(h, handler));
                        if set.is_empty() {
                            handlers.remove(&event_type);
                        }
                    }
                }
                None => {
                    handlers.remove(&event_type);
                }
            }
            handlers.is_empty()
        };

        if detach {
            self.source.set_message_handler(None);
            debug!(event_type = %event_type, "Receiver detached from message source");
        }
    }

    fn handle_message(&self, incoming: IncomingMessage) {
        let message: SyncMessage = match serde_json::from_value(incoming.data.clone()) {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, "Ignoring non-sync message");
                return;
            }
        };

        let handlers = self
            .handlers
            .lock()
            .get(&message.event_type)
            .cloned()
            .unwrap_or_default();
        if handlers.is_empty() {
            // Silence makes the sender report the event type as unsupported.
            return;
        }

        if let Err(e) = post_reply(&incoming, &SyncReply::ack(&message)) {
            warn!(error = %e, "Failed to encode ACK");
            return;
        }

        let origin = incoming.origin.clone();
        let task = async move {
            let outcomes = join_all(
                handlers
                    .iter()
                    .map(|handler| handler(origin.clone(), message.data.clone())),
            )
            .await;
            let settled: Vec<SettledResult> =
                outcomes.into_iter().map(SettledResult::from).collect();

            debug!(
                event_id = %message.event_id,
                handlers = settled.len(),
                "Sync message handled"
            );
            if let Err(e) = post_reply(&incoming, &SyncReply::done(&message, settled)) {
                warn!(error = %e, "Failed to encode DONE");
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(task);
            }
            Err(_) => futures::executor::block_on(task),
        }
    }
}

fn post_reply(incoming: &IncomingMessage, reply: &SyncReply) -> serde_json::Result<()> {
    let value = serde_json::to_value(reply)?;
    (incoming.reply)(value);
    Ok(())
}
