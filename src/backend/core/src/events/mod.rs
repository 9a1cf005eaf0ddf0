//! Append-only, hash-chained event ledger.
//!
//! This module provides:
//! - Immutable event records with content and chain hashes
//! - The event store: per-aggregate streams with a single serialization point
//! - Restartable stream readers and resumable integrity verification

pub mod event;
pub mod hash;
pub mod store;

pub use event::{
    ActorId, AggregateId, EventDraft, EventId, EventRecord, Operation, Payload, ResolutionMarker,
    ResolutionStrategy, ScopeId,
};
pub use store::{Appended, EventStore, IntegrityCheckpoint, StreamReader};
