//! Sending side of the ACK/DONE handshake.

use bridge_traits::messaging::{MessageTarget, ReplySink};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use crate::error::{ChannelError, Result};
use crate::protocol::{EventType, ReplyStatus, SettledResult, SyncMessage, SyncReply};

/// Posts sync messages to one target context and awaits its replies.
///
/// Every call to [`send`](Self::send) uses its own reply port, so concurrent
/// sends never see each other's replies. The port is dropped on every exit
/// path, which releases the target's reference to it.
pub struct Sender {
    target: Arc<dyn MessageTarget>,
    completion_timeout: Duration,
}

impl Sender {
    pub fn new(target: Arc<dyn MessageTarget>, completion_timeout: Duration) -> Self {
        Self {
            target,
            completion_timeout,
        }
    }

    /// Whether the target still controls this page.
    pub fn is_target_active(&self) -> bool {
        self.target.is_controller()
    }

    /// Send `data` as `event_type` and wait for the aggregated handler results.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::ConnectionUnavailable`] if the message cannot be posted
    /// - [`ChannelError::UnsupportedEvent`] if no ACK arrives within `ack_timeout`
    /// - [`ChannelError::Timeout`] if no DONE arrives within the completion timeout
    /// - [`ChannelError::InvalidResponse`] for any other reply status
    #[instrument(skip(self, data), fields(event_type = %event_type))]
    pub async fn send(
        &self,
        event_type: EventType,
        data: Value,
        ack_timeout: Duration,
    ) -> Result<Vec<SettledResult>> {
        let message = SyncMessage::new(event_type, data);
        let payload = serde_json::to_value(&message)?;

        // `tx` stays alive for the whole exchange so a target dropping its
        // port reads as silence rather than a closed channel.
        let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
        let port = tx.clone();
        let reply: ReplySink = Arc::new(move |value| {
            // The sender may already have given up; late replies are dropped.
            let _ = port.send(value);
        });

        self.target.post_message(payload, reply).map_err(|e| {
            warn!(error = %e, "Failed to post sync message");
            ChannelError::ConnectionUnavailable(e.to_string())
        })?;

        let first = tokio::time::timeout(ack_timeout, next_reply(&mut rx, &message))
            .await
            .map_err(|_| {
                debug!(event_id = %message.event_id, "No ACK from receiver");
                ChannelError::UnsupportedEvent(event_type.to_string())
            })??;

        match first.status {
            ReplyStatus::Ack => {}
            ReplyStatus::Done => return Ok(first.response.unwrap_or_default()),
            ReplyStatus::Error => {
                return Err(ChannelError::InvalidResponse(format!(
                    "unexpected status for {}",
                    event_type
                )))
            }
        }

        let done = await_done(&mut rx, &message);
        let response = tokio::time::timeout(self.completion_timeout, done)
            .await
            .map_err(|_| {
                debug!(event_id = %message.event_id, "No DONE from receiver");
                ChannelError::Timeout(event_type.to_string())
            })??;

        drop(tx);
        debug!(
            event_id = %message.event_id,
            results = response.len(),
            "Sync message completed"
        );
        Ok(response)
    }
}

/// Waits for DONE, skipping duplicate ACKs.
async fn await_done(
    rx: &mut mpsc::UnboundedReceiver<Value>,
    message: &SyncMessage,
) -> Result<Vec<SettledResult>> {
    loop {
        let reply = next_reply(rx, message).await?;
        match reply.status {
            ReplyStatus::Ack => continue,
            ReplyStatus::Done => return Ok(reply.response.unwrap_or_default()),
            ReplyStatus::Error => {
                return Err(ChannelError::InvalidResponse(format!(
                    "unexpected status for {}",
                    message.event_type
                )))
            }
        }
    }
}

/// Next well-formed reply correlated with `message`.
async fn next_reply(
    rx: &mut mpsc::UnboundedReceiver<Value>,
    message: &SyncMessage,
) -> Result<SyncReply> {
    loop {
        let value = rx.recv().await.ok_or(ChannelError::Closed)?;
        match serde_json::from_value::<SyncReply>(value) {
            Ok(reply) if reply.event_id == message.event_id => return Ok(reply),
            Ok(_) => continue,
            Err(e) => {
                debug!(error = %e, "Ignoring malformed reply");
                continue;
            }
        }
    }
}
