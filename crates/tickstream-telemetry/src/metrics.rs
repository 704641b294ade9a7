//! Prometheus metrics for the feed connection.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. If registration fails,
//! it indicates a fatal configuration error (e.g., duplicate metric names)
//! that should cause an immediate crash at startup rather than silent failure.
//! These panics only occur during static initialization, never at runtime.

use crate::error::TelemetryResult;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use prometheus::{
    register_gauge, register_gauge_vec, register_int_counter, register_int_counter_vec, Encoder,
    Gauge, GaugeVec, IntCounter, IntCounterVec, TextEncoder,
};
use tickstream_ws::{ConnectionState, RegistrationState, StatsSnapshot};

/// Connection state (1 = connected, 0 = disconnected).
pub static WS_CONNECTED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "tickstream_ws_connected",
        "Feed connection state (1=connected)"
    )
    .unwrap()
});

/// Transport ready-state.
/// Labels: state (disconnected/connecting/open/closing)
pub static WS_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "tickstream_ws_state",
        "Transport ready-state (1=current, 0=other)",
        &["state"]
    )
    .unwrap()
});

/// Session registration state (1 = active, 0 = suspended).
pub static WS_ACTIVE: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "tickstream_ws_active",
        "Session registration state (1=active)"
    )
    .unwrap()
});

/// Reconnect attempts made after unexpected closes.
pub static WS_RECONNECT_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "tickstream_ws_reconnect_total",
        "Total reconnect attempts"
    )
    .unwrap()
});

/// Inbound frames delivered to the consumer.
/// Labels: kind (text/binary/ping)
pub static WS_MESSAGES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tickstream_ws_messages_total",
        "Total inbound frames",
        &["kind"]
    )
    .unwrap()
});

/// Transport errors reported.
pub static WS_ERRORS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("tickstream_ws_errors_total", "Total transport errors").unwrap()
});

/// Subscription frames sent on open.
pub static WS_SUBSCRIPTIONS_SENT_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "tickstream_ws_subscriptions_sent_total",
        "Total subscription frames sent"
    )
    .unwrap()
});

const STATES: [ConnectionState; 4] = [
    ConnectionState::Disconnected,
    ConnectionState::Connecting,
    ConnectionState::Open,
    ConnectionState::Closing,
];

/// Metrics helper.
pub struct Metrics;

impl Metrics {
    /// Record the transport ready-state. Only the current state is set to 1.
    pub fn ws_state_set(state: ConnectionState) {
        for s in STATES {
            WS_STATE.with_label_values(&[s.as_str()]).set(0.0);
        }
        WS_STATE.with_label_values(&[state.as_str()]).set(1.0);
        WS_CONNECTED.set(if state == ConnectionState::Open { 1.0 } else { 0.0 });
    }

    pub fn ws_registration_set(registration: RegistrationState) {
        WS_ACTIVE.set(if registration == RegistrationState::Active {
            1.0
        } else {
            0.0
        });
    }

    /// Record an inbound frame.
    pub fn ws_message(kind: &str) {
        WS_MESSAGES_TOTAL.with_label_values(&[kind]).inc();
    }

    /// Record a transport error.
    pub fn ws_error() {
        WS_ERRORS_TOTAL.inc();
    }

    /// Render every registered metric in the text exposition format.
    pub fn gather_text() -> TelemetryResult<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}

/// Publishes session counters as deltas between successive snapshots.
#[derive(Default)]
pub struct StatsPublisher {
    last: Mutex<StatsSnapshot>,
}

impl StatsPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(
        &self,
        snapshot: &StatsSnapshot,
        state: ConnectionState,
        registration: RegistrationState,
    ) {
        let mut last = self.last.lock();
        WS_RECONNECT_TOTAL.inc_by(
            snapshot
                .reconnect_attempts
                .saturating_sub(last.reconnect_attempts),
        );
        WS_SUBSCRIPTIONS_SENT_TOTAL.inc_by(
            snapshot
                .subscriptions_sent
                .saturating_sub(last.subscriptions_sent),
        );
        *last = snapshot.clone();
        drop(last);

        Metrics::ws_state_set(state);
        Metrics::ws_registration_set(registration);
    }
}
