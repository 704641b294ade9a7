//! Mock feed server for integration tests.
//!
//! Provides a plain WebSocket server that can:
//! - Accept connections and count them
//! - Record received text frames
//! - Acknowledge subscriptions and follow up with a few ticks
//! - Drop every live connection without a close handshake
//! - Stall new connections: accept the TCP stream, never answer the upgrade

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tickstream_ws::{Frame, MessageConsumer};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message};

pub const SUBSCRIPTION: &str = r#"{"method":"subscribe","subscription":{"type":"trades","coin":"BTC"}}"#;

/// Ticks sent after each acknowledged subscription.
pub const TICKS_PER_SUBSCRIPTION: usize = 2;

#[derive(Default)]
struct ServerState {
    messages: Vec<String>,
    connections: u32,
    client_closes: u32,
}

pub struct MockFeedServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    kick_tx: broadcast::Sender<()>,
    state: Arc<Mutex<ServerState>>,
    stall: Arc<AtomicBool>,
}

impl MockFeedServer {
    /// Start a new mock server on an available port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(ServerState::default()));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (kick_tx, _) = broadcast::channel::<()>(4);
        let stall = Arc::new(AtomicBool::new(false));

        let state_clone = state.clone();
        let kick_clone = kick_tx.clone();
        let stall_clone = stall.clone();
        tokio::spawn(async move {
            let mut stalled = Vec::new();
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        if stall_clone.load(Ordering::SeqCst) {
                            stalled.push(stream);
                            continue;
                        }
                        tokio::spawn(handle_connection(
                            stream,
                            state_clone.clone(),
                            kick_clone.subscribe(),
                        ));
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            kick_tx,
            state,
            stall,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/feed", self.addr)
    }

    pub fn connection_count(&self) -> u32 {
        self.state.lock().connections
    }

    pub fn client_closes(&self) -> u32 {
        self.state.lock().client_closes
    }

    pub fn received_messages(&self) -> Vec<String> {
        self.state.lock().messages.clone()
    }

    /// Drop every live connection abruptly.
    pub fn drop_connections(&self) {
        let _ = self.kick_tx.send(());
    }

    /// Hold new connections open without completing the WebSocket upgrade.
    pub fn stall_new_connections(&self) {
        self.stall.store(true, Ordering::SeqCst);
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    state: Arc<Mutex<ServerState>>,
    mut kick_rx: broadcast::Receiver<()>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };
    state.lock().connections += 1;

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            _ = kick_rx.recv() => return,
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    state.lock().messages.push(text.clone());

                    let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&text) else {
                        continue;
                    };
                    if parsed.get("method") != Some(&serde_json::json!("subscribe")) {
                        continue;
                    }
                    let ack = serde_json::json!({
                        "channel": "subscriptionResponse",
                        "data": parsed,
                    });
                    let _ = write.send(Message::Text(ack.to_string())).await;
                    for px in 0..TICKS_PER_SUBSCRIPTION {
                        let tick = serde_json::json!({
                            "channel": "trades",
                            "data": [{"coin": "BTC", "px": (60_000 + px).to_string()}],
                        });
                        let _ = write.send(Message::Text(tick.to_string())).await;
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) => {
                    state.lock().client_closes += 1;
                    return;
                }
                Some(Err(_)) | None => return,
                _ => {}
            }
        }
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

    pub fn text_count(&self) -> usize {
        self.frames.lock().iter().filter(|f| f.is_text()).count()
    }
}

impl MessageConsumer for RecordingConsumer {
    fn on_message(&self, frame: &Frame) {
        self.frames.lock().push(frame.clone());
    }
}

/// Poll `cond` until it holds, failing the test after five seconds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
