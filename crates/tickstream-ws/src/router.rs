//! Message router.
//!
//! Sends the feed subscription once per successful open and detects the
//! handshake: the first text frame of a connection. The handshake detector
//! detaches itself after that frame so later frames reach only the consumer,
//! and is re-armed on the next open.

use crate::dispatch::{Binding, EventDispatcher, EventHandler, Frame, HandlerId, TransportEvent};
use crate::session::Session;
use crate::stats::SessionStats;
use std::sync::{Arc, OnceLock, Weak};
use tracing::{debug, info, warn};

pub struct MessageRouter {
    session: Arc<Session>,
    dispatcher: Arc<EventDispatcher>,
    stats: Arc<SessionStats>,
    /// Handshake binding as registered, used to re-arm detection.
    handshake: OnceLock<Binding>,
    self_ref: Weak<MessageRouter>,
}

impl MessageRouter {
    pub fn new(
        session: Arc<Session>,
        dispatcher: Arc<EventDispatcher>,
        stats: Arc<SessionStats>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            session,
            dispatcher,
            stats,
            handshake: OnceLock::new(),
            self_ref: self_ref.clone(),
        })
    }

    /// Handler bound to open events.
    pub fn open_handler(&self) -> Arc<dyn EventHandler> {
        Arc::new(SubscribeOnOpen {
            router: self.self_ref.clone(),
        })
    }

    /// Handler bound to message events for handshake detection.
    pub fn handshake_handler(&self) -> Arc<dyn EventHandler> {
        Arc::new(HandshakeDetector {
            router: self.self_ref.clone(),
        })
    }

    /// Remember the registered handshake binding so it can be re-armed.
    pub fn set_handshake_binding(&self, binding: Binding) {
        if self.handshake.set(binding).is_err() {
            debug!("Handshake binding already set");
        }
    }

    fn on_open(&self) {
        if !self.session.is_active() {
            debug!("Open while suspended, not subscribing");
            return;
        }
        self.stats.record_open();

        let (Some(handle), Some(endpoint)) = (self.session.handle(), self.session.endpoint())
        else {
            warn!("Open event without handle or endpoint");
            return;
        };

        if let Some(binding) = self.handshake.get() {
            if self.dispatcher.attach_one(binding) {
                debug!("Handshake detection re-armed");
            }
        }

        match handle.send_text(endpoint.subscription.clone()) {
            Ok(()) => {
                self.stats.record_subscription_sent();
                info!(uri = %endpoint.uri, "Subscription sent");
            }
            Err(e) => warn!(error = %e, uri = %endpoint.uri, "Failed to send subscription"),
        }
    }

    fn on_message(&self, frame: &Frame) {
        if !frame.is_text() {
            return;
        }
        if self.dispatcher.detach_one(HandlerId::Handshake) {
            self.stats.record_handshake();
            info!("Handshake received, detection stepping aside");
        }
    }
}

struct SubscribeOnOpen {
    router: Weak<MessageRouter>,
}

impl EventHandler for SubscribeOnOpen {
    fn handle(&self, event: &TransportEvent) {
        if let (TransportEvent::Open, Some(router)) = (event, self.router.upgrade()) {
            router.on_open();
        }
    }
}

struct HandshakeDetector {
    router: Weak<MessageRouter>,
}

impl EventHandler for HandshakeDetector {
    fn handle(&self, event: &TransportEvent) {
        if let (TransportEvent::Message(frame), Some(router)) = (event, self.router.upgrade()) {
            router.on_message(frame);
        }
    }
}
