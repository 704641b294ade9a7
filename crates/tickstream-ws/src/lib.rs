//! Self-healing market-data stream connection.
//!
//! Keeps one streaming connection to a feed and:
//! - Wires lifecycle and message handlers on resume, unwires them on sleep (idempotent)
//! - Reconnects at a fixed interval, indefinitely, after an unexpected close
//! - Sends the feed subscription once per successful open
//! - Detects the handshake frame and hands every frame to the consumer
//! - Enforces a minimum TLS version with an injectable certificate policy

pub mod client;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod feed;
pub mod reconnect;
pub mod registry;
pub mod router;
pub mod session;
pub mod stats;
pub mod tls;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use client::{FeedClient, FeedClientBuilder};
pub use connection::{ConnectionConfig, ConnectionManager, OpenMode};
pub use dispatch::{CloseInfo, EventKind, Frame, HandlerId, TransportEvent};
pub use error::{WsError, WsResult};
pub use feed::{
    ErrorReporter, FeedEndpoint, FeedSource, MessageConsumer, StaticFeedSource, TracingReporter,
};
pub use reconnect::{FixedInterval, RetryPolicy};
pub use session::RegistrationState;
pub use stats::StatsSnapshot;
pub use tls::{CertificatePolicy, CertificateValidation, MinTlsVersion, TlsSettings};
pub use transport::{ConnectionState, Connector, TransportHandle, WsConnector};

use std::sync::Once;

/// Normal closure status code.
pub const CLOSE_NORMAL: u16 = 1000;
/// Status reported when a connection ends without a close handshake.
pub const CLOSE_ABNORMAL: u16 = 1006;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any WebSocket connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
