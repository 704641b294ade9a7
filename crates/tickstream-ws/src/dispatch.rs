//! Transport event delivery.
//!
//! Transport handles emit [`TransportEvent`]s through an [`EventSink`]; the
//! [`EventDispatcher`] delivers each event to the handlers currently bound for
//! its kind, in registration order. Handler bindings are grouped into a
//! [`HandlerSet`] that is attached and detached as one unit. While detached,
//! single bindings cannot be re-attached, so a handler racing a detach never
//! lands in an unbound dispatcher.
//!
//! Each sink is stamped with the generation of the handle it belongs to.
//! Events from a replaced handle are dropped before reaching any handler.

use crate::error::{WsError, WsResult};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::trace;

/// Inbound frame delivered to message handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    /// Ping payload, only delivered when ping emission is enabled.
    Ping(Vec<u8>),
}

impl Frame {
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
            Self::Ping(_) => "ping",
        }
    }
}

/// Close details reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
    /// Whether a close handshake completed.
    pub was_clean: bool,
}

impl CloseInfo {
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: crate::CLOSE_ABNORMAL,
            reason: reason.into(),
            was_clean: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Close(CloseInfo),
    Error(String),
    Message(Frame),
}

impl TransportEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Open => EventKind::Open,
            Self::Close(_) => EventKind::Close,
            Self::Error(_) => EventKind::Error,
            Self::Message(_) => EventKind::Message,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Open,
    Close,
    Error,
    Message,
}

/// Identity of a bound handler. A given id is bound at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerId {
    Close,
    Error,
    Open,
    Handshake,
    Consumer,
}

/// Receives transport events.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &TransportEvent);
}

/// One (event kind, handler) binding.
#[derive(Clone)]
pub struct Binding {
    pub id: HandlerId,
    pub kind: EventKind,
    handler: Arc<dyn EventHandler>,
    /// Position within its set; keeps dispatch order stable when re-attached.
    rank: usize,
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("rank", &self.rank)
            .finish()
    }
}

/// Ordered group of bindings attached and detached as a single unit.
#[derive(Debug, Clone, Default)]
pub struct HandlerSet {
    bindings: Vec<Binding>,
}

impl HandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a binding. Order of calls is the dispatch order.
    pub fn with(mut self, id: HandlerId, kind: EventKind, handler: Arc<dyn EventHandler>) -> Self {
        let rank = self.bindings.len();
        self.bindings.push(Binding {
            id,
            kind,
            handler,
            rank,
        });
        self
    }

    pub fn get(&self, id: HandlerId) -> Option<&Binding> {
        self.bindings.iter().find(|b| b.id == id)
    }

    pub(crate) fn len(&self) -> usize {
        self.bindings.len()
    }
}

#[derive(Default)]
struct Bound {
    /// Set by `attach`, cleared by `detach`.
    attached: bool,
    list: Vec<Binding>,
}

/// Routes transport events to bound handlers.
pub struct EventDispatcher {
    bindings: RwLock<Bound>,
    generation: AtomicU64,
    self_ref: Weak<EventDispatcher>,
}

impl EventDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            bindings: RwLock::new(Bound::default()),
            generation: AtomicU64::new(0),
            self_ref: self_ref.clone(),
        })
    }

    /// Sink for a handle of the given generation.
    pub fn sink(&self, generation: u64) -> EventSink {
        EventSink {
            dispatcher: self.self_ref.clone(),
            generation,
        }
    }

    /// Make `generation` the only one whose events are delivered.
    pub fn set_generation(&self, generation: u64) {
        self.generation.store(generation, Ordering::SeqCst);
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Attach every binding of `set`. Fails without side effects if any is already bound.
    pub fn attach(&self, set: &HandlerSet) -> WsResult<()> {
        let mut bound = self.bindings.write();
        if let Some(dup) = set
            .bindings
            .iter()
            .find(|b| bound.list.iter().any(|existing| existing.id == b.id))
        {
            return Err(WsError::AlreadyRegistered(dup.id));
        }
        for binding in &set.bindings {
            insert_ranked(&mut bound.list, binding.clone());
        }
        bound.attached = true;
        Ok(())
    }

    /// Attach a single binding at its ranked position.
    ///
    /// Returns false if already bound, or if no set is attached.
    pub fn attach_one(&self, binding: &Binding) -> bool {
        let mut bound = self.bindings.write();
        if !bound.attached {
            trace!(id = ?binding.id, "Dispatcher detached, not re-attaching");
            return false;
        }
        if bound.list.iter().any(|b| b.id == binding.id) {
            return false;
        }
        insert_ranked(&mut bound.list, binding.clone());
        true
    }

    /// Detach every binding of `set`, in reverse registration order.
    ///
    /// Bindings that already stepped aside are skipped. Returns how many were removed.
    pub fn detach(&self, set: &HandlerSet) -> usize {
        let mut bound = self.bindings.write();
        bound.attached = false;
        let mut removed = 0;
        for binding in set.bindings.iter().rev() {
            if let Some(pos) = bound.list.iter().position(|b| b.id == binding.id) {
                bound.list.remove(pos);
                removed += 1;
            }
        }
        removed
    }

    /// Detach a single binding. Returns false if it was not bound.
    pub fn detach_one(&self, id: HandlerId) -> bool {
        let mut bound = self.bindings.write();
        match bound.list.iter().position(|b| b.id == id) {
            Some(pos) => {
                bound.list.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn is_bound(&self, id: HandlerId) -> bool {
        self.bindings.read().list.iter().any(|b| b.id == id)
    }

    /// Currently bound handler ids, in dispatch order.
    pub fn bound(&self) -> Vec<HandlerId> {
        self.bindings.read().list.iter().map(|b| b.id).collect()
    }

    /// Deliver `event` from a handle of `generation`.
    ///
    /// Handlers run against a snapshot taken before the first is invoked, so
    /// a handler detaching itself does not hide the event from later ones.
    pub fn dispatch(&self, generation: u64, event: &TransportEvent) {
        let current = self.generation();
        if generation != current {
            trace!(generation, current, kind = ?event.kind(), "Dropping event from replaced handle");
            return;
        }

        let kind = event.kind();
        let targets: Vec<Arc<dyn EventHandler>> = self
            .bindings
            .read()
            .list
            .iter()
            .filter(|b| b.kind == kind)
            .map(|b| b.handler.clone())
            .collect();

        for handler in targets {
            handler.handle(event);
        }
    }
}

fn insert_ranked(bindings: &mut Vec<Binding>, binding: Binding) {
    let pos = bindings
        .iter()
        .position(|b| b.rank > binding.rank)
        .unwrap_or(bindings.len());
    bindings.insert(pos, binding);
}

/// Emission side handed to a transport handle.
#[derive(Clone)]
pub struct EventSink {
    dispatcher: Weak<EventDispatcher>,
    generation: u64,
}

impl EventSink {
    pub fn emit(&self, event: TransportEvent) {
        if let Some(dispatcher) = self.dispatcher.upgrade() {
            dispatcher.dispatch(self.generation, &event);
        }
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("generation", &self.generation)
            .finish()
    }
}
