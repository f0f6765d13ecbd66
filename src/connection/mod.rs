//! Connection Layer
//!
//! Per-client lifecycle tracking with validated transitions and
//! synchronous observer fan-out.

pub mod state;
pub mod observer;
pub mod machine;

pub use state::{ConnectionState, StateTransition};
pub use observer::{ConnectionObserver, ObserverId, TransitionLog};
pub use machine::{BatchingConfig, ClientSession, ConnectionStateMachine};
