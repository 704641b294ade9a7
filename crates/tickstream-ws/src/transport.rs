//! Transport seam and the tokio-tungstenite implementation.
//!
//! A [`Connector`] creates one [`TransportHandle`] per connect. Creating a
//! handle and opening it are distinct steps: `open()` starts a connection
//! attempt and may be called again on the same handle after it closes.

use crate::dispatch::{CloseInfo, EventSink, Frame, TransportEvent};
use crate::error::{WsError, WsResult};
use crate::tls::TlsSettings;
use crate::CLOSE_NORMAL;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use rustls::ClientConfig;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, Connector as TlsConnector};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Ready-state of a transport handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Open,
    Closing,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single streaming connection target.
pub trait TransportHandle: Send + Sync {
    fn ready_state(&self) -> ConnectionState;

    /// True iff the ready-state is `Open`.
    fn is_alive(&self) -> bool {
        self.ready_state() == ConnectionState::Open
    }

    /// Start a connection attempt.
    ///
    /// The attempt begins before this returns; the future resolves once the
    /// attempt succeeds or fails. Calling this while connecting or open is a no-op.
    fn open(&self) -> BoxFuture<'static, WsResult<()>>;

    /// Queue a text frame.
    fn send_text(&self, text: String) -> WsResult<()>;

    /// Request a graceful close. No-op unless connecting or open.
    fn close(&self, code: u16, reason: &str) -> WsResult<()>;

    /// Target address.
    fn uri(&self) -> &str;
}

/// Creates transport handles.
pub trait Connector: Send + Sync {
    fn create(
        &self,
        uri: &str,
        tls: &TlsSettings,
        events: EventSink,
    ) -> WsResult<Arc<dyn TransportHandle>>;
}

/// Connector producing tokio-tungstenite handles.
#[derive(Debug, Clone)]
pub struct WsConnector {
    emit_on_ping: bool,
    disable_nagle: bool,
}

impl WsConnector {
    pub fn new(emit_on_ping: bool, disable_nagle: bool) -> Self {
        Self {
            emit_on_ping,
            disable_nagle,
        }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(true, true)
    }
}

impl Connector for WsConnector {
    fn create(
        &self,
        uri: &str,
        tls: &TlsSettings,
        events: EventSink,
    ) -> WsResult<Arc<dyn TransportHandle>> {
        let tls_config = tls.client_config()?;
        debug!(%uri, min_tls = ?tls.min_version, policy = ?tls.policy, "Created transport handle");
        Ok(Arc::new(WsTransport {
            shared: Arc::new(WsShared {
                uri: uri.to_string(),
                tls: tls_config,
                emit_on_ping: self.emit_on_ping,
                disable_nagle: self.disable_nagle,
                events,
                state: RwLock::new(ConnectionState::Disconnected),
            }),
            link: Mutex::new(None),
        }))
    }
}

enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

/// Channel into the task driving the current connection attempt.
struct Link {
    tx: mpsc::UnboundedSender<Outbound>,
    cancel: CancellationToken,
}

struct WsShared {
    uri: String,
    tls: Arc<ClientConfig>,
    emit_on_ping: bool,
    disable_nagle: bool,
    events: EventSink,
    state: RwLock<ConnectionState>,
}

impl WsShared {
    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    /// Mark the connection dead and report why.
    fn fail(&self, message: String) {
        self.set_state(ConnectionState::Disconnected);
        self.events.emit(TransportEvent::Error(message.clone()));
        self.events
            .emit(TransportEvent::Close(CloseInfo::abnormal(message)));
    }
}

struct WsTransport {
    shared: Arc<WsShared>,
    link: Mutex<Option<Link>>,
}

impl TransportHandle for WsTransport {
    fn ready_state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    fn open(&self) -> BoxFuture<'static, WsResult<()>> {
        {
            let mut state = self.shared.state.write();
            if matches!(*state, ConnectionState::Connecting | ConnectionState::Open) {
                debug!(state = %*state, "Open requested while already active");
                return Box::pin(async { Ok(()) });
            }
            *state = ConnectionState::Connecting;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();

        if let Some(previous) = self.link.lock().replace(Link {
            tx,
            cancel: cancel.clone(),
        }) {
            previous.cancel.cancel();
        }

        tokio::spawn(run_connection(self.shared.clone(), rx, cancel, ready_tx));

        Box::pin(async move {
            ready_rx.await.unwrap_or_else(|_| {
                Err(WsError::ConnectionFailed(
                    "connection task ended before reporting".to_string(),
                ))
            })
        })
    }

    fn send_text(&self, text: String) -> WsResult<()> {
        if self.ready_state() != ConnectionState::Open {
            return Err(WsError::NotConnected(format!(
                "cannot send while {}",
                self.ready_state()
            )));
        }
        let link = self.link.lock();
        let link = link
            .as_ref()
            .ok_or_else(|| WsError::NotConnected("no active link".to_string()))?;
        link.tx
            .send(Outbound::Text(text))
            .map_err(|_| WsError::SendFailed("connection task has exited".to_string()))
    }

    fn close(&self, code: u16, reason: &str) -> WsResult<()> {
        match self.ready_state() {
            ConnectionState::Open => {
                let link = self.link.lock();
                let Some(link) = link.as_ref() else {
                    return Ok(());
                };
                self.shared.set_state(ConnectionState::Closing);
                link.tx
                    .send(Outbound::Close {
                        code,
                        reason: reason.to_string(),
                    })
                    .map_err(|_| WsError::SendFailed("connection task has exited".to_string()))
            }
            ConnectionState::Connecting => {
                if let Some(link) = self.link.lock().as_ref() {
                    debug!(uri = %self.shared.uri, "Cancelling pending connection attempt");
                    link.cancel.cancel();
                }
                Ok(())
            }
            ConnectionState::Closing | ConnectionState::Disconnected => Ok(()),
        }
    }

    fn uri(&self) -> &str {
        &self.shared.uri
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        if let Some(link) = self.link.get_mut().take() {
            link.cancel.cancel();
        }
    }
}

async fn run_connection(
    shared: Arc<WsShared>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    cancel: CancellationToken,
    ready: oneshot::Sender<WsResult<()>>,
) {
    info!(uri = %shared.uri, "Connecting to feed");

    let connect = connect_async_tls_with_config(
        shared.uri.as_str(),
        None,
        shared.disable_nagle,
        Some(TlsConnector::Rustls(shared.tls.clone())),
    );

    let ws_stream = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            debug!(uri = %shared.uri, "Connection attempt cancelled");
            shared.set_state(ConnectionState::Disconnected);
            let _ = ready.send(Err(WsError::Cancelled));
            return;
        }
        result = connect => match result {
            Ok((stream, _response)) => stream,
            Err(e) => {
                warn!(uri = %shared.uri, error = %e, "Connection attempt failed");
                shared.fail(e.to_string());
                let _ = ready.send(Err(e.into()));
                return;
            }
        }
    };

    let (mut write, mut read) = ws_stream.split();
    shared.set_state(ConnectionState::Open);
    info!(uri = %shared.uri, "Feed connected");
    shared.events.emit(TransportEvent::Open);
    let _ = ready.send(Ok(()));

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!(uri = %shared.uri, "Link cancelled, closing");
                let _ = write.send(Message::Close(Some(close_frame(CLOSE_NORMAL, "")))).await;
                shared.set_state(ConnectionState::Disconnected);
                return;
            }

            out = outbound.recv() => match out {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        warn!(error = %e, "Send failed");
                        shared.fail(e.to_string());
                        return;
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    debug!(code, %reason, "Sending close frame");
                    if let Err(e) = write.send(Message::Close(Some(close_frame(code, &reason)))).await {
                        warn!(error = %e, "Close frame failed");
                        shared.fail(e.to_string());
                        return;
                    }
                }
                None => {
                    shared.set_state(ConnectionState::Disconnected);
                    return;
                }
            },

            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    shared.events.emit(TransportEvent::Message(Frame::Text(text)));
                }
                Some(Ok(Message::Binary(data))) => {
                    shared.events.emit(TransportEvent::Message(Frame::Binary(data)));
                }
                Some(Ok(Message::Ping(data))) => {
                    if shared.emit_on_ping {
                        shared.events.emit(TransportEvent::Message(Frame::Ping(data)));
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (f.code.into(), f.reason.to_string()))
                        .unwrap_or((CLOSE_NORMAL, String::new()));
                    info!(code, %reason, "Feed connection closed");
                    shared.set_state(ConnectionState::Disconnected);
                    shared.events.emit(TransportEvent::Close(CloseInfo {
                        code,
                        reason,
                        was_clean: true,
                    }));
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "Feed read error");
                    shared.fail(e.to_string());
                    return;
                }
                None => {
                    warn!("Feed stream ended");
                    shared.set_state(ConnectionState::Disconnected);
                    shared.events.emit(TransportEvent::Close(CloseInfo::abnormal("stream ended")));
                    return;
                }
            }
        }
    }
}

fn close_frame(code: u16, reason: &str) -> CloseFrame<'static> {
    CloseFrame {
        code: CloseCode::from(code),
        reason: reason.to_string().into(),
    }
}
