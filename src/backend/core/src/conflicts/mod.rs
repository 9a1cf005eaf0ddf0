//! Durable causal conflicts and their resolution lifecycle.

pub mod manager;

pub use manager::{Conflict, ConflictId, ConflictManager, ConflictStatus};
