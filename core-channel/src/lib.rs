//! # Cross-Context Sync Channel
//!
//! Request / acknowledge / complete handshake used by the durable store to
//! tell a cooperating background worker that a key changed.
//!
//! ## Protocol
//!
//! 1. The [`Sender`](sender::Sender) posts `{eventType, eventId, data}` with a
//!    fresh reply port.
//! 2. A [`Receiver`](receiver::Receiver) with at least one handler for the
//!    event type answers `ack` straight away, runs every handler concurrently
//!    and answers `done` with one settled result per handler.
//! 3. No `ack` within the ACK timeout means the event type is unsupported;
//!    no `done` within the completion timeout is a timeout.
//!
//! Notifications are advisory: callers log and swallow every
//! [`ChannelError`].

pub mod error;
pub mod local;
pub mod protocol;
pub mod receiver;
pub mod sender;

pub use error::{ChannelError, Result};
pub use local::LocalEndpoint;
pub use protocol::{EventType, ReplyStatus, SettledResult, SyncMessage, SyncReply};
pub use receiver::{EventHandler, HandlerFuture, Receiver};
pub use sender::Sender;
