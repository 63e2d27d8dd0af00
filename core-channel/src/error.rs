use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Connection unavailable: {0}")]
    ConnectionUnavailable(String),

    #[error("Event type not supported by receiver: {0}")]
    UnsupportedEvent(String),

    #[error("Timed out waiting for completion of {0}")]
    Timeout(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Reply port closed before the exchange completed")]
    Closed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ChannelError>;
