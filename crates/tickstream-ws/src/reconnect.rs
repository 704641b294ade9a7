//! Reconnect loop.
//!
//! Reacts to a close the caller did not request by retrying `open()` on a
//! retry policy until the transport reports alive. The default policy waits a
//! fixed interval and never gives up.
//!
//! At most one loop runs per session. The loop is armed by resume and
//! disarmed by sleep; disarming cancels any run in flight.

use crate::connection::ConnectionManager;
use crate::dispatch::{EventHandler, TransportEvent};
use crate::session::Session;
use crate::stats::SessionStats;
use crate::transport::ConnectionState;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Delay before each reconnect attempt.
pub trait RetryPolicy: Send + Sync + fmt::Debug {
    /// Delay before attempt `attempt` (1-based). `None` stops retrying.
    fn next_delay(&self, attempt: u32) -> Option<Duration>;
}

/// Constant delay, unlimited attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedInterval {
    interval: Duration,
}

impl FixedInterval {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Default for FixedInterval {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl RetryPolicy for FixedInterval {
    fn next_delay(&self, _attempt: u32) -> Option<Duration> {
        Some(self.interval)
    }
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunExit {
    Cancelled,
    Suspended,
    Alive,
    Exhausted,
}

struct Run {
    id: u64,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Slot {
    armed: bool,
    running: Option<Run>,
    next_id: u64,
}

pub struct ReconnectLoop {
    session: Arc<Session>,
    connection: Arc<ConnectionManager>,
    policy: Arc<dyn RetryPolicy>,
    stats: Arc<SessionStats>,
    slot: Mutex<Slot>,
    self_ref: Weak<ReconnectLoop>,
}

impl ReconnectLoop {
    pub fn new(
        session: Arc<Session>,
        connection: Arc<ConnectionManager>,
        policy: Arc<dyn RetryPolicy>,
        stats: Arc<SessionStats>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            session,
            connection,
            policy,
            stats,
            slot: Mutex::new(Slot::default()),
            self_ref: self_ref.clone(),
        })
    }

    /// Handler bound to close events.
    pub fn close_handler(&self) -> Arc<dyn EventHandler> {
        Arc::new(ReconnectOnClose {
            reconnect: self.self_ref.clone(),
        })
    }

    /// Allow unexpected closes to start a run.
    pub fn arm(&self) {
        self.slot.lock().armed = true;
    }

    /// Stop accepting triggers and cancel the run in flight.
    ///
    /// Returns the cancelled run's task so the caller can wait for it to finish.
    pub fn disarm(&self) -> Option<JoinHandle<()>> {
        let mut slot = self.slot.lock();
        slot.armed = false;
        slot.running.take().and_then(|mut run| {
            debug!(run = run.id, "Cancelling reconnect run");
            run.cancel.cancel();
            run.task.take()
        })
    }

    /// Whether a run is in flight.
    pub fn is_running(&self) -> bool {
        self.slot.lock().running.is_some()
    }

    /// Start a run unless disarmed or one is already in flight.
    pub fn trigger(&self) {
        let mut slot = self.slot.lock();
        if !slot.armed {
            debug!("Reconnect not armed, ignoring close");
            return;
        }
        if slot.running.is_some() {
            debug!("Reconnect already in flight");
            return;
        }
        self.start_locked(&mut slot);
    }

    fn start_locked(&self, slot: &mut Slot) {
        let Some(this) = self.self_ref.upgrade() else {
            return;
        };
        slot.next_id += 1;
        let id = slot.next_id;
        let cancel = CancellationToken::new();
        self.stats.record_reconnect_run();
        info!(run = id, "Starting reconnect loop");

        let task = tokio::spawn(this.run(id, cancel.clone()));
        slot.running = Some(Run {
            id,
            cancel,
            task: Some(task),
        });
    }

    async fn run(self: Arc<Self>, id: u64, cancel: CancellationToken) {
        let exit = self.retry_until_alive(&cancel).await;
        debug!(run = id, ?exit, "Reconnect loop finished");

        let mut slot = self.slot.lock();
        if slot.running.as_ref().map(|r| r.id) != Some(id) {
            return;
        }
        slot.running = None;

        // A close landing after the final alive check was ignored as in flight.
        if exit == RunExit::Alive
            && slot.armed
            && self.session.connection_state() == ConnectionState::Disconnected
        {
            info!("Connection dropped as reconnect finished, restarting loop");
            self.start_locked(&mut slot);
        }
    }

    async fn retry_until_alive(&self, cancel: &CancellationToken) -> RunExit {
        let mut attempt = 0u32;
        loop {
            attempt = attempt.saturating_add(1);
            let Some(delay) = self.policy.next_delay(attempt) else {
                warn!(attempt, "Retry policy exhausted, giving up");
                return RunExit::Exhausted;
            };

            tokio::select! {
                biased;
                () = cancel.cancelled() => return RunExit::Cancelled,
                () = tokio::time::sleep(delay) => {}
            }

            let guard = tokio::select! {
                biased;
                () = cancel.cancelled() => return RunExit::Cancelled,
                guard = self.session.lock() => guard,
            };

            if !self.session.is_active() {
                return RunExit::Suspended;
            }
            if self.connection.is_connected() {
                info!(attempt, "Transport alive again");
                return RunExit::Alive;
            }

            self.stats.record_reconnect_attempt();
            info!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");
            let pending = self.connection.start_open(&guard);
            drop(guard);

            // Awaited outside the lifecycle region so sleep can close the
            // connecting handle and cancel this run.
            let result = match pending {
                Ok(pending) => tokio::select! {
                    biased;
                    () = cancel.cancelled() => return RunExit::Cancelled,
                    result = pending => result,
                },
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!(attempt, error = %e, "Reconnect attempt failed");
            }
        }
    }
}

struct ReconnectOnClose {
    reconnect: Weak<ReconnectLoop>,
}

impl EventHandler for ReconnectOnClose {
    fn handle(&self, event: &TransportEvent) {
        let TransportEvent::Close(info) = event else {
            return;
        };
        let Some(reconnect) = self.reconnect.upgrade() else {
            return;
        };
        if !reconnect.session.is_active() {
            debug!(code = info.code, "Close while suspended");
            return;
        }
        reconnect.stats.record_unexpected_close();
        warn!(code = info.code, reason = %info.reason, clean = info.was_clean, "Unexpected close");
        reconnect.trigger();
    }
}
