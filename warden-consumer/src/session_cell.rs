//! Single-slot publication of the current broker session.
//!
//! The supervisor's event task is the only writer; the pull engine reads.
//! Every publish bumps the generation, so a reader can tell that the session
//! it bound to has been replaced.

use std::sync::Arc;

use arc_swap::ArcSwap;
use warden_broker::Session;
use warden_core::SessionGeneration;

use crate::error::{ConsumerError, ConsumerResult};

/// What a slot holds.
#[derive(Clone)]
pub enum SessionState {
    /// A usable session.
    Live(Arc<dyn Session>),
    /// Re-derivation after a reconnect failed.
    Stale {
        /// Why re-derivation failed.
        reason: String,
    },
}

/// An immutable published slot.
#[derive(Clone)]
pub struct SessionSlot {
    generation: SessionGeneration,
    state: SessionState,
}

impl SessionSlot {
    /// Generation of this slot.
    #[must_use]
    pub const fn generation(&self) -> SessionGeneration {
        self.generation
    }

    /// Returns true if the slot holds no usable session.
    #[must_use]
    pub const fn is_stale(&self) -> bool {
        matches!(self.state, SessionState::Stale { .. })
    }

    /// Returns the session.
    ///
    /// # Errors
    /// Returns `StaleSession` if re-derivation failed for this generation.
    pub fn session(&self) -> ConsumerResult<Arc<dyn Session>> {
        match &self.state {
            SessionState::Live(session) => Ok(Arc::clone(session)),
            SessionState::Stale { reason } => Err(ConsumerError::StaleSession {
                generation: self.generation,
                reason: reason.clone(),
            }),
        }
    }
}

impl std::fmt::Debug for SessionSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSlot")
            .field("generation", &self.generation)
            .field("stale", &self.is_stale())
            .finish()
    }
}

/// Atomically swappable holder of the current session.
pub struct SessionCell {
    slot: ArcSwap<SessionSlot>,
}

impl SessionCell {
    /// Creates a cell holding `session` as generation 1.
    #[must_use]
    pub fn new(session: Arc<dyn Session>) -> Self {
        Self {
            slot: ArcSwap::from_pointee(SessionSlot {
                generation: SessionGeneration::new(1),
                state: SessionState::Live(session),
            }),
        }
    }

    /// Returns the current slot.
    #[must_use]
    pub fn current(&self) -> Arc<SessionSlot> {
        self.slot.load_full()
    }

    /// Returns the current generation.
    #[must_use]
    pub fn generation(&self) -> SessionGeneration {
        self.slot.load().generation
    }

    /// Returns the current session.
    ///
    /// # Errors
    /// Returns `StaleSession` if the current slot is stale.
    pub fn session(&self) -> ConsumerResult<Arc<dyn Session>> {
        self.slot.load().session()
    }

    /// Publishes a freshly derived session under the next generation.
    pub fn publish(&self, session: Arc<dyn Session>) -> SessionGeneration {
        self.replace(SessionState::Live(session))
    }

    /// Marks the cell stale under the next generation.
    pub fn mark_stale(&self, reason: impl Into<String>) -> SessionGeneration {
        self.replace(SessionState::Stale {
            reason: reason.into(),
        })
    }

    fn replace(&self, state: SessionState) -> SessionGeneration {
        let generation = self.slot.load().generation.next();
        self.slot.store(Arc::new(SessionSlot { generation, state }));
        generation
    }
}

impl std::fmt::Debug for SessionCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCell")
            .field("slot", &*self.slot.load())
            .finish()
    }
}
