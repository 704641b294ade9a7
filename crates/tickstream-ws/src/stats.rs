//! Session counters.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// Running counters for one session.
#[derive(Debug, Default)]
pub struct SessionStats {
    opens: AtomicU64,
    unexpected_closes: AtomicU64,
    reconnect_runs: AtomicU64,
    reconnect_attempts: AtomicU64,
    subscriptions_sent: AtomicU64,
    frames_received: AtomicU64,
    transport_errors: AtomicU64,
    handshakes: AtomicU64,
    last_open: RwLock<Option<DateTime<Utc>>>,
    last_message: RwLock<Option<DateTime<Utc>>>,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_open(&self) {
        self.opens.fetch_add(1, Ordering::Relaxed);
        *self.last_open.write() = Some(Utc::now());
    }

    pub fn record_unexpected_close(&self) {
        self.unexpected_closes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect_run(&self) {
        self.reconnect_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_subscription_sent(&self) {
        self.subscriptions_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        *self.last_message.write() = Some(Utc::now());
    }

    pub fn record_error(&self) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handshake(&self) {
        self.handshakes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            opens: self.opens.load(Ordering::Relaxed),
            unexpected_closes: self.unexpected_closes.load(Ordering::Relaxed),
            reconnect_runs: self.reconnect_runs.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            subscriptions_sent: self.subscriptions_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            handshakes: self.handshakes.load(Ordering::Relaxed),
            last_open: *self.last_open.read(),
            last_message: *self.last_message.read(),
        }
    }
}

/// Point-in-time copy of [`SessionStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub opens: u64,
    pub unexpected_closes: u64,
    /// Reconnect loops started.
    pub reconnect_runs: u64,
    /// Open() calls made by reconnect loops.
    pub reconnect_attempts: u64,
    pub subscriptions_sent: u64,
    pub frames_received: u64,
    pub transport_errors: u64,
    pub handshakes: u64,
    pub last_open: Option<DateTime<Utc>>,
    pub last_message: Option<DateTime<Utc>>,
}

impl StatsSnapshot {
    /// Milliseconds since the last inbound frame.
    pub fn since_last_message_ms(&self) -> Option<i64> {
        self.last_message
            .map(|t| (Utc::now() - t).num_milliseconds())
    }
}
