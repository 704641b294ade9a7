//! Feed endpoint and the collaborators consumed at the stream boundary.
//!
//! - [`FeedSource`] supplies the endpoint to stream from (may change per call)
//! - [`ErrorReporter`] receives transport errors, fire-and-forget
//! - [`MessageConsumer`] receives every inbound frame

use crate::dispatch::Frame;
use crate::error::{WsError, WsResult};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::http::Uri;
use tracing::warn;

/// Remote address plus the subscription payload describing which market is streamed.
///
/// Immutable once fetched. A fresh value is fetched for every non-initial connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEndpoint {
    /// WebSocket address (`ws://` or `wss://`).
    pub uri: String,
    /// Payload sent once after every successful open.
    pub subscription: String,
}

impl FeedEndpoint {
    pub fn new(uri: impl Into<String>, subscription: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            subscription: subscription.into(),
        }
    }

    /// Reject endpoints that cannot produce a usable connection.
    pub fn validate(&self) -> WsResult<()> {
        if self.uri.trim().is_empty() {
            return Err(WsError::Configuration("feed uri is empty".to_string()));
        }

        let parsed: Uri = self
            .uri
            .parse()
            .map_err(|e| WsError::Configuration(format!("invalid feed uri {}: {e}", self.uri)))?;

        match parsed.scheme_str() {
            Some("ws") | Some("wss") => {}
            other => {
                return Err(WsError::Configuration(format!(
                    "unsupported feed uri scheme {:?} in {}",
                    other, self.uri
                )))
            }
        }

        if parsed.host().is_none() {
            return Err(WsError::Configuration(format!(
                "feed uri has no host: {}",
                self.uri
            )));
        }

        if self.subscription.is_empty() {
            return Err(WsError::Configuration(format!(
                "feed {} has an empty subscription payload",
                self.uri
            )));
        }

        Ok(())
    }
}

/// Supplies the endpoint of the currently selected feed.
#[cfg_attr(test, mockall::automock)]
pub trait FeedSource: Send + Sync {
    /// Fetch the endpoint. May return a different endpoint on each call.
    fn get_feed(&self) -> WsResult<FeedEndpoint>;
}

/// Receives transport error messages. Results are ignored by the caller.
#[cfg_attr(test, mockall::automock)]
pub trait ErrorReporter: Send + Sync {
    fn report(&self, message: &str);
}

/// Receives every inbound frame.
///
/// Invoked from the transport's delivery context, so implementations should
/// hand heavy work off rather than block.
pub trait MessageConsumer: Send + Sync {
    fn on_message(&self, frame: &Frame);
}

/// Feed source that always returns the same endpoint.
#[derive(Debug, Clone)]
pub struct StaticFeedSource {
    endpoint: FeedEndpoint,
}

impl StaticFeedSource {
    pub fn new(endpoint: FeedEndpoint) -> Self {
        Self { endpoint }
    }
}

impl FeedSource for StaticFeedSource {
    fn get_feed(&self) -> WsResult<FeedEndpoint> {
        Ok(self.endpoint.clone())
    }
}

/// Reporter that writes errors to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, message: &str) {
        warn!(%message, "Transport error reported");
    }
}
