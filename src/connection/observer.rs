//! Transition Observers
//!
//! Subscribers notified synchronously by the state machine.

use parking_lot::Mutex;

use super::state::StateTransition;

/// Handle returned by `add_observer`, used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(pub(crate) u64);

/// Receives accepted connection transitions.
///
/// Called inline while the client's transition is being committed, so
/// implementations must return quickly and must not call back into the
/// state machine for the same client.
pub trait ConnectionObserver: Send + Sync {
    /// One accepted transition.
    fn on_state_transition(&self, transition: &StateTransition);

    /// A coalesced batch, in acceptance order (batching mode only).
    fn on_state_transitions(&self, batch: &[StateTransition]) {
        for transition in batch {
            self.on_state_transition(transition);
        }
    }
}

impl<F> ConnectionObserver for F
where
    F: Fn(&StateTransition) + Send + Sync,
{
    fn on_state_transition(&self, transition: &StateTransition) {
        self(transition)
    }
}

/// Observer that keeps every transition it sees.
///
/// Used by the hub for per-client history and by tests.
#[derive(Debug, Default)]
pub struct TransitionLog {
    transitions: Mutex<Vec<StateTransition>>,
    deliveries: Mutex<usize>,
}

impl TransitionLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all recorded transitions.
    pub fn transitions(&self) -> Vec<StateTransition> {
        self.transitions.lock().clone()
    }

    /// Number of recorded transitions.
    pub fn len(&self) -> usize {
        self.transitions.lock().len()
    }

    /// True if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.transitions.lock().is_empty()
    }

    /// Number of observer calls received (a batch counts once).
    pub fn deliveries(&self) -> usize {
        *self.deliveries.lock()
    }
}

impl ConnectionObserver for TransitionLog {
    fn on_state_transition(&self, transition: &StateTransition) {
        *self.deliveries.lock() += 1;
        self.transitions.lock().push(transition.clone());
    }

    fn on_state_transitions(&self, batch: &[StateTransition]) {
        *self.deliveries.lock() += 1;
        self.transitions.lock().extend_from_slice(batch);
    }
}
