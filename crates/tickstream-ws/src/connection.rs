//! Connection manager.
//!
//! Creates, opens and closes the session's transport handle and refreshes
//! the feed endpoint on every non-initial connect. Operations run inside the
//! session lifecycle region and take its guard; a started open attempt is
//! settled after the guard is released.

use crate::dispatch::EventDispatcher;
use crate::error::{WsError, WsResult};
use crate::feed::{FeedEndpoint, FeedSource};
use crate::session::{Session, SessionGuard};
use crate::tls::{CertificateValidation, MinTlsVersion, TlsSettings};
use crate::transport::{BoxFuture, ConnectionState, Connector};
use crate::CLOSE_NORMAL;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A started connection attempt.
pub type OpenAttempt = BoxFuture<'static, WsResult<()>>;

/// How `open()` waits for the connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenMode {
    /// Start the attempt and return immediately.
    #[default]
    Background,
    /// Wait for the attempt to finish, for hosts without async connect support.
    Blocking,
}

/// Connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub open_mode: OpenMode,
    pub min_tls_version: MinTlsVersion,
    pub certificate_validation: CertificateValidation,
    /// Fixed delay between reconnect attempts.
    pub reconnect_interval_ms: u64,
    /// Deliver inbound pings to message handlers.
    pub emit_on_ping: bool,
    /// Set TCP_NODELAY on the socket.
    pub disable_nagle: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            open_mode: OpenMode::Background,
            min_tls_version: MinTlsVersion::Tls12,
            certificate_validation: CertificateValidation::WebPki,
            reconnect_interval_ms: 1000,
            emit_on_ping: true,
            disable_nagle: true,
        }
    }
}

impl ConnectionConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn tls_settings(&self) -> TlsSettings {
        TlsSettings::new(self.min_tls_version, self.certificate_validation.into())
    }
}

/// Opens and closes the session's transport.
pub struct ConnectionManager {
    session: Arc<Session>,
    dispatcher: Arc<EventDispatcher>,
    feed_source: Arc<dyn FeedSource>,
    connector: Arc<dyn Connector>,
    tls: TlsSettings,
    open_mode: OpenMode,
}

impl ConnectionManager {
    pub fn new(
        session: Arc<Session>,
        dispatcher: Arc<EventDispatcher>,
        feed_source: Arc<dyn FeedSource>,
        connector: Arc<dyn Connector>,
        tls: TlsSettings,
        open_mode: OpenMode,
    ) -> Self {
        Self {
            session,
            dispatcher,
            feed_source,
            connector,
            tls,
            open_mode,
        }
    }

    /// Fetch the initial endpoint and create the first handle.
    pub fn init(&self, guard: &SessionGuard<'_>) -> WsResult<()> {
        let endpoint = self.fetch_endpoint()?;
        self.session.set_endpoint(guard, endpoint);
        self.connect(guard, true)
    }

    /// Create a new handle for the current endpoint.
    ///
    /// Unless `is_init`, the endpoint is fetched again first so a market
    /// switch takes effect. The handle is created but not opened. A replaced
    /// handle is closed if still alive and its events stop being delivered.
    pub fn connect(&self, guard: &SessionGuard<'_>, is_init: bool) -> WsResult<()> {
        if !is_init {
            let endpoint = self.fetch_endpoint()?;
            self.session.set_endpoint(guard, endpoint);
        }

        let endpoint = self.session.endpoint().ok_or_else(|| {
            WsError::Configuration("no feed endpoint, init has not run".to_string())
        })?;
        endpoint.validate()?;

        let generation = self.session.next_generation(guard);
        let handle = self
            .connector
            .create(&endpoint.uri, &self.tls, self.dispatcher.sink(generation))?;

        let previous = self.session.install_handle(guard, generation, handle);
        self.dispatcher.set_generation(generation);
        info!(uri = %endpoint.uri, generation, is_init, "Transport handle created");

        if let Some(previous) = previous {
            if previous.ready_state() != ConnectionState::Disconnected {
                debug!(uri = %previous.uri(), "Closing replaced handle");
                if let Err(e) = previous.close(CLOSE_NORMAL, "replaced") {
                    warn!(error = %e, "Failed to close replaced handle");
                }
            }
        }

        Ok(())
    }

    /// Start and settle an attempt while holding the guard.
    #[cfg(test)]
    pub(crate) async fn open(&self, guard: &SessionGuard<'_>) -> WsResult<()> {
        let attempt = self.start_open(guard)?;
        self.finish_open(attempt).await
    }

    /// Start a connection attempt on the current handle.
    ///
    /// The attempt is under way when this returns. The returned future
    /// resolves with its outcome and needs no lock, so a concurrent close
    /// can cancel the attempt while it is awaited.
    pub fn start_open(&self, _guard: &SessionGuard<'_>) -> WsResult<OpenAttempt> {
        let handle = self
            .session
            .handle()
            .ok_or_else(|| WsError::NotConnected("no transport handle, connect first".to_string()))?;
        Ok(handle.open())
    }

    /// Settle a started attempt.
    ///
    /// In background mode this returns at once; failures arrive as transport
    /// events. In blocking mode it waits for the attempt and returns its result.
    pub async fn finish_open(&self, attempt: OpenAttempt) -> WsResult<()> {
        match self.open_mode {
            OpenMode::Blocking => attempt.await,
            OpenMode::Background => {
                tokio::spawn(async move {
                    if let Err(e) = attempt.await {
                        debug!(error = %e, "Background open failed");
                    }
                });
                Ok(())
            }
        }
    }

    /// Gracefully close the current handle. Absent or closed handles are a no-op.
    pub fn close(&self, _guard: &SessionGuard<'_>) -> WsResult<()> {
        match self.session.handle() {
            Some(handle) => handle.close(CLOSE_NORMAL, ""),
            None => Ok(()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.connection_state() == ConnectionState::Open
    }

    pub fn endpoint(&self) -> Option<FeedEndpoint> {
        self.session.endpoint()
    }

    fn fetch_endpoint(&self) -> WsResult<FeedEndpoint> {
        let endpoint = self.feed_source.get_feed()?;
        endpoint.validate()?;
        debug!(uri = %endpoint.uri, "Fetched feed endpoint");
        Ok(endpoint)
    }
}
