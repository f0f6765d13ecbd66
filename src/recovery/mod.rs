//! Recovery Framework
//!
//! Routes classified `NetworkError`s to pluggable recovery strategies.
//!
//! - `strategy`: the strategy contract, context, result, attempt loop
//! - `resync`: rebuild and resend the full view
//! - `retransmit`: ask the peer to resend a malformed payload
//! - `reconnect`: restore a lost link through the state machine
//! - `manager`: priority selection and background execution

pub mod strategy;
pub mod resync;
pub mod retransmit;
pub mod reconnect;
pub mod manager;

pub use crate::error::{
    ConnectionError, GameStateError, MalformedMessageError, NetworkError, ProtocolError, RecoveryType,
    ValidationError,
};
pub use strategy::{exponential_backoff, RecoveryConfig, RecoveryContext, RecoveryResult, RecoveryStrategy};
pub use resync::{operation, RecoveryOperation, ResyncStrategy};
pub use retransmit::RetransmitStrategy;
pub use reconnect::ReconnectStrategy;
pub use manager::{RecoveryHandle, RecoveryManager};
