//! Cross-Context Messaging
//!
//! Thin abstraction over `postMessage` + `MessageChannel`. The sync channel in
//! `core-channel` builds its ACK/DONE handshake on these two traits; the host
//! only has to move JSON values between contexts.

use serde_json::Value;
use std::sync::Arc;

use crate::{error::Result, platform::PlatformSendSync};

/// Port used to answer a single inbound message. Wraps `MessagePort.postMessage`.
pub type ReplySink = Arc<dyn Fn(Value) + Send + Sync>;

/// An inbound message together with the port the sender listens on.
#[derive(Clone)]
pub struct IncomingMessage {
    /// Origin of the sending context.
    pub origin: String,
    /// Message payload.
    pub data: Value,
    /// Reply port transferred with the message.
    pub reply: ReplySink,
}

impl std::fmt::Debug for IncomingMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncomingMessage")
            .field("origin", &self.origin)
            .field("data", &self.data)
            .field("reply", &"ReplySink { ... }")
            .finish()
    }
}

/// Callback receiving inbound messages.
pub type MessageHandler = Arc<dyn Fn(IncomingMessage) + Send + Sync>;

/// A context that can be messaged, such as the active service worker.
pub trait MessageTarget: PlatformSendSync {
    /// Post `message` to the target, transferring `reply` as its reply port.
    fn post_message(&self, message: Value, reply: ReplySink) -> Result<()>;

    /// Whether the target is still the worker controlling the current page.
    ///
    /// Notifications are only worth sending to the controlling worker.
    fn is_controller(&self) -> bool {
        true
    }
}

/// The current context's inbound message stream, such as a worker global scope.
pub trait MessageSource: PlatformSendSync {
    /// Install (or with `None`, remove) the `message` event handler.
    fn set_message_handler(&self, handler: Option<MessageHandler>);
}
