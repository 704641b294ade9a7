//! Event subscription registry: the Resume/Sleep gate.
//!
//! Resume wires the handler set to the transport and opens it; Sleep unwires
//! the set and closes the transport. Both run inside the session lifecycle
//! region and are no-ops when already in the target state, so the handler set
//! is never bound twice nor left half-bound.

use crate::connection::ConnectionManager;
use crate::dispatch::{EventDispatcher, EventHandler, HandlerSet, TransportEvent};
use crate::error::{WsError, WsResult};
use crate::feed::{ErrorReporter, MessageConsumer};
use crate::reconnect::ReconnectLoop;
use crate::session::{RegistrationState, Session};
use crate::stats::SessionStats;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct EventSubscriptionRegistry {
    session: Arc<Session>,
    connection: Arc<ConnectionManager>,
    dispatcher: Arc<EventDispatcher>,
    reconnect: Arc<ReconnectLoop>,
    handlers: HandlerSet,
}

impl EventSubscriptionRegistry {
    /// `handlers` is the full ordered set bound on resume.
    pub fn new(
        session: Arc<Session>,
        connection: Arc<ConnectionManager>,
        dispatcher: Arc<EventDispatcher>,
        reconnect: Arc<ReconnectLoop>,
        handlers: HandlerSet,
    ) -> Self {
        Self {
            session,
            connection,
            dispatcher,
            reconnect,
            handlers,
        }
    }

    pub fn state(&self) -> RegistrationState {
        self.session.registration()
    }

    /// Bind the handler set and open the transport.
    ///
    /// Fails without changing state before `init`. An open failure is
    /// returned as advisory: the registry stays Active and the reconnect
    /// loop keeps retrying. The attempt is awaited outside the lifecycle
    /// region, so a sleep issued meanwhile cancels it.
    pub async fn resume(&self) -> WsResult<()> {
        let guard = self.session.lock().await;
        if self.session.is_active() {
            debug!("Resume while active, nothing to do");
            return Ok(());
        }

        if self.session.handle().is_none() {
            return Err(WsError::Configuration(
                "no transport handle, init has not run".to_string(),
            ));
        }

        self.dispatcher.attach(&self.handlers)?;
        self.reconnect.arm();
        self.session
            .set_registration(&guard, RegistrationState::Active);
        info!(handlers = self.handlers.len(), "Stream resumed");

        let attempt = self.connection.start_open(&guard)?;
        drop(guard);
        self.connection.finish_open(attempt).await
    }

    /// Unbind the handler set, close the transport and cancel reconnection.
    pub async fn sleep(&self) -> WsResult<()> {
        let guard = self.session.lock().await;
        if !self.session.is_active() {
            debug!("Sleep while suspended, nothing to do");
            return Ok(());
        }

        self.session
            .set_registration(&guard, RegistrationState::Suspended);
        let pending = self.reconnect.disarm();
        let removed = self.dispatcher.detach(&self.handlers);
        let closed = self.connection.close(&guard);

        if let Some(task) = pending {
            if let Err(e) = task.await {
                warn!(error = %e, "Reconnect task ended abnormally");
            }
        }
        info!(removed, "Stream suspended");

        closed
    }
}

/// Forwards transport errors to the reporter. Errors never change state.
pub(crate) struct ReportErrors {
    pub(crate) reporter: Arc<dyn ErrorReporter>,
    pub(crate) stats: Arc<SessionStats>,
}

impl EventHandler for ReportErrors {
    fn handle(&self, event: &TransportEvent) {
        if let TransportEvent::Error(message) = event {
            self.stats.record_error();
            self.reporter.report(message);
        }
    }
}

/// Hands every inbound frame to the consumer.
pub(crate) struct DeliverToConsumer {
    pub(crate) consumer: Arc<dyn MessageConsumer>,
    pub(crate) stats: Arc<SessionStats>,
}

impl EventHandler for DeliverToConsumer {
    fn handle(&self, event: &TransportEvent) {
        if let TransportEvent::Message(frame) = event {
            self.stats.record_frame();
            self.consumer.on_message(frame);
        }
    }
}
