//! In-process transport.
//!
//! A [`LocalEndpoint`] is both ends of a message port living in the same
//! process: whatever is posted to it is handed to the handler installed on it.
//! Hosts use it to run the worker side of the durable store in-process, and
//! tests use it to wire a [`Sender`](crate::Sender) to a
//! [`Receiver`](crate::Receiver).

use bridge_traits::error::Result;
use bridge_traits::messaging::{
    IncomingMessage, MessageHandler, MessageSource, MessageTarget, ReplySink,
};
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::trace;

pub struct LocalEndpoint {
    origin: String,
    handler: RwLock<Option<MessageHandler>>,
    controller: AtomicBool,
}

impl LocalEndpoint {
    /// Creates an endpoint whose messages report `origin` as their sender.
    pub fn new(origin: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            origin: origin.into(),
            handler: RwLock::new(None),
            controller: AtomicBool::new(true),
        })
    }

    pub fn has_handler(&self) -> bool {
        self.handler.read().is_some()
    }

    /// Simulate the worker losing (or regaining) control of the page.
    pub fn set_controller(&self, controller: bool) {
        self.controller.store(controller, Ordering::SeqCst);
    }
}

impl MessageTarget for LocalEndpoint {
    fn post_message(&self, message: Value, reply: ReplySink) -> Result<()> {
        let handler = self.handler.read().clone();
        match handler {
            Some(handler) => handler(IncomingMessage {
                origin: self.origin.clone(),
                data: message,
                reply,
            }),
            None => trace!("Dropping message posted to endpoint without handler"),
        }
        Ok(())
    }

    fn is_controller(&self) -> bool {
        self.controller.load(Ordering::SeqCst)
    }
}

impl MessageSource for LocalEndpoint {
    fn set_message_handler(&self, handler: Option<MessageHandler>) {
        *self.handler.write() = handler;
    }
}
