//! Domain layer types and invariants.

pub mod error;
pub mod node;
pub mod snapshot;
pub mod types;
