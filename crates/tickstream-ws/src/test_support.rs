//! Scripted transport and collaborators for state-machine tests.

use crate::dispatch::{CloseInfo, EventSink, Frame, TransportEvent};
use crate::error::{WsError, WsResult};
use crate::feed::{FeedEndpoint, FeedSource, MessageConsumer};
use crate::tls::TlsSettings;
use crate::transport::{BoxFuture, ConnectionState, Connector, TransportHandle};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Connector whose handles connect synchronously, succeeding or failing on demand,
/// or hang in `Connecting` until closed.
pub struct MockConnector {
    handles: Mutex<Vec<Arc<MockHandle>>>,
    open_succeeds: Arc<AtomicBool>,
    open_hangs: Arc<AtomicBool>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            handles: Mutex::new(Vec::new()),
            open_succeeds: Arc::new(AtomicBool::new(true)),
            open_hangs: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_open_succeeds(&self, succeeds: bool) {
        self.open_succeeds.store(succeeds, Ordering::SeqCst);
    }

    /// Opens stay in `Connecting` until the handle is closed.
    pub fn set_open_hangs(&self, hangs: bool) {
        self.open_hangs.store(hangs, Ordering::SeqCst);
    }

    pub fn handles(&self) -> Vec<Arc<MockHandle>> {
        self.handles.lock().clone()
    }

    pub fn last(&self) -> Option<Arc<MockHandle>> {
        self.handles.lock().last().cloned()
    }

    /// Open calls across every handle created.
    pub fn total_open_calls(&self) -> u32 {
        self.handles.lock().iter().map(|h| h.open_calls()).sum()
    }
}

impl Connector for MockConnector {
    fn create(
        &self,
        uri: &str,
        _tls: &TlsSettings,
        events: EventSink,
    ) -> WsResult<Arc<dyn TransportHandle>> {
        let handle = Arc::new(MockHandle {
            uri: uri.to_string(),
            events,
            state: RwLock::new(ConnectionState::Disconnected),
            open_succeeds: self.open_succeeds.clone(),
            open_hangs: self.open_hangs.clone(),
            pending: Mutex::new(None),
            open_calls: AtomicU32::new(0),
            close_calls: AtomicU32::new(0),
            sent: Mutex::new(Vec::new()),
        });
        self.handles.lock().push(handle.clone());
        Ok(handle)
    }
}

pub struct MockHandle {
    uri: String,
    events: EventSink,
    state: RwLock<ConnectionState>,
    open_succeeds: Arc<AtomicBool>,
    open_hangs: Arc<AtomicBool>,
    pending: Mutex<Option<CancellationToken>>,
    open_calls: AtomicU32,
    close_calls: AtomicU32,
    sent: Mutex<Vec<String>>,
}

impl MockHandle {
    /// Connect immediately, emitting the resulting events. Locks are released before emitting.
    pub fn open_now(&self) -> WsResult<()> {
        {
            let mut state = self.state.write();
            if matches!(*state, ConnectionState::Connecting | ConnectionState::Open) {
                return Ok(());
            }
            if !self.open_succeeds.load(Ordering::SeqCst) {
                *state = ConnectionState::Disconnected;
                drop(state);
                self.events
                    .emit(TransportEvent::Error("connection refused".to_string()));
                self.events
                    .emit(TransportEvent::Close(CloseInfo::abnormal("connection refused")));
                return Err(WsError::ConnectionFailed("connection refused".to_string()));
            }
            *state = ConnectionState::Open;
        }
        self.events.emit(TransportEvent::Open);
        Ok(())
    }

    /// Simulate the server dropping the connection.
    pub fn drop_connection(&self) {
        *self.state.write() = ConnectionState::Disconnected;
        self.events
            .emit(TransportEvent::Close(CloseInfo::abnormal("connection reset")));
    }

    pub fn deliver(&self, frame: Frame) {
        self.events.emit(TransportEvent::Message(frame));
    }

    pub fn deliver_text(&self, text: &str) {
        self.deliver(Frame::Text(text.to_string()));
    }

    pub fn emit_error(&self, message: &str) {
        self.events.emit(TransportEvent::Error(message.to_string()));
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn open_calls(&self) -> u32 {
        self.open_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> u32 {
        self.close_calls.load(Ordering::SeqCst)
    }
}

impl TransportHandle for MockHandle {
    fn ready_state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn open(&self) -> BoxFuture<'static, WsResult<()>> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        if self.open_hangs.load(Ordering::SeqCst) {
            let mut state = self.state.write();
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                let cancel = CancellationToken::new();
                *self.pending.lock() = Some(cancel.clone());
                return Box::pin(async move {
                    cancel.cancelled().await;
                    Err(WsError::Cancelled)
                });
            }
            return Box::pin(async { Ok(()) });
        }
        let result = self.open_now();
        Box::pin(async move { result })
    }

    fn send_text(&self, text: String) -> WsResult<()> {
        if self.ready_state() != ConnectionState::Open {
            return Err(WsError::NotConnected("mock not open".to_string()));
        }
        self.sent.lock().push(text);
        Ok(())
    }

    fn close(&self, code: u16, reason: &str) -> WsResult<()> {
        if self.ready_state() == ConnectionState::Connecting {
            if let Some(cancel) = self.pending.lock().take() {
                cancel.cancel();
            }
            *self.state.write() = ConnectionState::Disconnected;
            return Ok(());
        }
        if self.ready_state() != ConnectionState::Open {
            return Ok(());
        }
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        *self.state.write() = ConnectionState::Disconnected;
        self.events.emit(TransportEvent::Close(CloseInfo {
            code,
            reason: reason.to_string(),
            was_clean: true,
        }));
        Ok(())
    }

    fn uri(&self) -> &str {
        &self.uri
    }
}

/// Feed source whose selection can be changed between calls.
pub struct SwitchableFeedSource {
    current: Mutex<FeedEndpoint>,
    calls: AtomicU32,
}

impl SwitchableFeedSource {
    pub fn new(endpoint: FeedEndpoint) -> Self {
        Self {
            current: Mutex::new(endpoint),
            calls: AtomicU32::new(0),
        }
    }

    pub fn set(&self, endpoint: FeedEndpoint) {
        *self.current.lock() = endpoint;
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FeedSource for SwitchableFeedSource {
    fn get_feed(&self) -> WsResult<FeedEndpoint> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.current.lock().clone())
    }
}

/// Consumer recording every frame it receives.
#[derive(Default)]
pub struct RecordingConsumer {
    frames: Mutex<Vec<Frame>>,
}

impl RecordingConsumer {
    pub fn frames(&self) -> Vec<Frame> {
        self.frames.lock().clone()
    }
}

impl MessageConsumer for RecordingConsumer {
    fn on_message(&self, frame: &Frame) {
        self.frames.lock().push(frame.clone());
    }
}
