//! Session state: the live transport handle, the current feed endpoint and
//! the registration state.
//!
//! Mutations are serialized by the lifecycle lock. Every mutator takes a
//! [`SessionGuard`] as proof the lock is held; readers (transport callbacks)
//! take a short read lock on the state without waiting on the lifecycle.

use crate::feed::FeedEndpoint;
use crate::transport::{ConnectionState, TransportHandle};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{Mutex as TokioMutex, MutexGuard as TokioMutexGuard};

/// Whether lifecycle and message handlers are wired to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegistrationState {
    #[default]
    Suspended,
    Active,
}

#[derive(Default)]
struct SessionState {
    handle: Option<Arc<dyn TransportHandle>>,
    endpoint: Option<FeedEndpoint>,
    registration: RegistrationState,
    /// Bumped for every handle installed.
    generation: u64,
}

/// Owner of the transport handle, endpoint and registration state.
#[derive(Default)]
pub struct Session {
    lifecycle: TokioMutex<()>,
    state: RwLock<SessionState>,
}

/// Proof that the session's lifecycle lock is held.
pub struct SessionGuard<'a> {
    _lock: TokioMutexGuard<'a, ()>,
}

impl Session {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Enter the serialized lifecycle region.
    pub async fn lock(&self) -> SessionGuard<'_> {
        SessionGuard {
            _lock: self.lifecycle.lock().await,
        }
    }

    pub fn registration(&self) -> RegistrationState {
        self.state.read().registration
    }

    pub fn is_active(&self) -> bool {
        self.registration() == RegistrationState::Active
    }

    pub fn handle(&self) -> Option<Arc<dyn TransportHandle>> {
        self.state.read().handle.clone()
    }

    pub fn endpoint(&self) -> Option<FeedEndpoint> {
        self.state.read().endpoint.clone()
    }

    #[cfg(test)]
    pub(crate) fn generation(&self) -> u64 {
        self.state.read().generation
    }

    /// Ready-state of the live handle, `Disconnected` when there is none.
    pub fn connection_state(&self) -> ConnectionState {
        self.state
            .read()
            .handle
            .as_ref()
            .map(|h| h.ready_state())
            .unwrap_or_default()
    }

    pub fn set_registration(&self, _guard: &SessionGuard<'_>, registration: RegistrationState) {
        self.state.write().registration = registration;
    }

    pub fn set_endpoint(&self, _guard: &SessionGuard<'_>, endpoint: FeedEndpoint) {
        self.state.write().endpoint = Some(endpoint);
    }

    /// Reserve the generation number for the next handle.
    pub fn next_generation(&self, _guard: &SessionGuard<'_>) -> u64 {
        self.state.read().generation + 1
    }

    /// Install a new handle under `generation`, returning the one it replaces.
    pub fn install_handle(
        &self,
        _guard: &SessionGuard<'_>,
        generation: u64,
        handle: Arc<dyn TransportHandle>,
    ) -> Option<Arc<dyn TransportHandle>> {
        let mut state = self.state.write();
        state.generation = generation;
        state.handle.replace(handle)
    }
}
