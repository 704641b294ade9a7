//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tickstream_ws::WsError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] tickstream_telemetry::TelemetryError),

    #[error("Unknown feed: {0}")]
    UnknownFeed(String),
}

pub type AppResult<T> = Result<T, AppError>;
