//! Core primitives shared by every layer.
//!
//! Identifiers and view digests. Nothing in here performs I/O.

pub mod ids;
pub mod hash;

// Re-export core types
pub use ids::{ClientId, GameId, CardId, PlayerIndex};
pub use hash::{ViewDigest, ViewHasher};
