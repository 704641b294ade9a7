//! Stream error types.

use crate::dispatch::HandlerId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WsError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Not connected: {0}")]
    NotConnected(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("Handler already registered: {0:?}")]
    AlreadyRegistered(HandlerId),

    #[error("Connection attempt cancelled")]
    Cancelled,

    #[error("Tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),
}

impl WsError {
    /// Whether this error stems from a missing or unusable feed endpoint.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

pub type WsResult<T> = Result<T, WsError>;
