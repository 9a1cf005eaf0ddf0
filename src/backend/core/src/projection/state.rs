//! Materialized aggregate state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::event::{ActorId, AggregateId, EventId, Payload, ScopeId};

/// The current projected state of one aggregate.
///
/// Entirely derived from the event stream; deleting and rebuilding it from
/// the events yields an identical value. Deleted aggregates keep their state
/// row with `deleted` set, because regulated data is never physically erased.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateState {
    pub aggregate_id: AggregateId,

    /// Scope the aggregate lives in, fixed by its first event
    pub scope_id: ScopeId,

    /// Actor who created the aggregate; the subject the record belongs to
    pub owner_id: ActorId,

    /// Payload of the latest folded event (full-state, not a diff)
    pub current_payload: Payload,

    /// Count of folded events; diverged events do not advance it
    pub version: u64,

    /// The folded head; the causal parent the next write must name
    pub last_event_id: EventId,

    /// Server time of the latest folded event
    pub updated_at: DateTime<Utc>,

    /// Set by delete markers; the record itself persists
    pub deleted: bool,
}
