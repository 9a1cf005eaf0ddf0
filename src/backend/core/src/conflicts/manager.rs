//! Conflict records and their state machine.
//!
//! A conflict is opened when an appended event's causal parent does not match
//! the projected head. Conflicts are first-class, queryable records: they are
//! never silently discarded, and resolution only ever moves them from
//! `Open` to `Resolved` after a resolution event has been accepted into the
//! stream.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{CoreError, ErrorCode, Result};
use crate::events::event::{
    ActorId, AggregateId, EventId, EventRecord, ResolutionStrategy, ScopeId,
};

// ═══════════════════════════════════════════════════════════════════════════════
// Conflict Record
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique identifier for a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConflictId(pub Uuid);

impl ConflictId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConflictId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    Open,
    Resolved,
}

/// A recorded causal divergence awaiting (or past) resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub conflict_id: ConflictId,
    pub aggregate_id: AggregateId,
    pub scope_id: ScopeId,

    /// The event that diverged; it remains in the stream, unfolded
    pub incoming_event_id: EventId,

    /// Verbatim copy of the diverged event, so reviewers see both sides
    /// without walking the stream
    pub incoming_event: EventRecord,

    /// The folded head the incoming event competed against
    pub competing_head_id: Option<EventId>,

    pub detected_at: DateTime<Utc>,
    pub status: ConflictStatus,

    /// Populated on resolution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_strategy: Option<ResolutionStrategy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_event_id: Option<EventId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<ActorId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Conflict {
    pub fn is_open(&self) -> bool {
        self.status == ConflictStatus::Open
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Conflict Manager
// ═══════════════════════════════════════════════════════════════════════════════

/// Registry of all conflicts, indexed by id and by aggregate.
pub struct ConflictManager {
    conflicts: DashMap<ConflictId, Conflict>,
    by_aggregate: DashMap<AggregateId, Vec<ConflictId>>,
}

impl ConflictManager {
    pub fn new() -> Self {
        Self {
            conflicts: DashMap::new(),
            by_aggregate: DashMap::new(),
        }
    }

    /// Record a divergence as an open conflict.
    pub fn open(&self, incoming: &EventRecord, competing_head_id: Option<EventId>) -> Conflict {
        let conflict = Conflict {
            conflict_id: ConflictId::new(),
            aggregate_id: incoming.aggregate_id,
            scope_id: incoming.scope_id.clone(),
            incoming_event_id: incoming.event_id,
            incoming_event: incoming.clone(),
            competing_head_id,
            detected_at: Utc::now(),
            status: ConflictStatus::Open,
            resolution_strategy: None,
            resolution_event_id: None,
            resolved_by: None,
            resolved_at: None,
        };

        warn!(
            conflict_id = %conflict.conflict_id,
            aggregate_id = %conflict.aggregate_id,
            incoming_event_id = %conflict.incoming_event_id,
            competing_head_id = ?conflict.competing_head_id,
            "causal conflict opened"
        );

        self.conflicts
            .insert(conflict.conflict_id, conflict.clone());
        self.by_aggregate
            .entry(incoming.aggregate_id)
            .or_default()
            .push(conflict.conflict_id);
        conflict
    }

    pub fn get(&self, conflict_id: ConflictId) -> Result<Conflict> {
        self.conflicts
            .get(&conflict_id)
            .map(|c| c.clone())
            .ok_or_else(|| CoreError::not_found("conflict", conflict_id.to_string()))
    }

    /// Open conflicts, optionally narrowed to one scope.
    pub fn list_open(&self, scope: Option<&ScopeId>) -> Vec<Conflict> {
        let mut open: Vec<Conflict> = self
            .conflicts
            .iter()
            .filter(|entry| entry.is_open())
            .filter(|entry| scope.map(|s| entry.scope_id == *s).unwrap_or(true))
            .map(|entry| entry.clone())
            .collect();
        open.sort_by_key(|c| c.detected_at);
        open
    }

    /// All conflicts ever recorded for an aggregate, in detection order.
    pub fn list_for_aggregate(&self, aggregate_id: AggregateId) -> Vec<Conflict> {
        self.by_aggregate
            .get(&aggregate_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.conflicts.get(id).map(|c| c.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_open(&self, aggregate_id: AggregateId) -> bool {
        self.list_for_aggregate(aggregate_id)
            .iter()
            .any(Conflict::is_open)
    }

    /// Mark a conflict resolved, pointing at the accepted resolution event.
    ///
    /// Fails if the conflict is unknown or already resolved; resolution is
    /// one-shot and never reopened.
    pub fn resolve(
        &self,
        conflict_id: ConflictId,
        strategy: ResolutionStrategy,
        resolution_event_id: EventId,
        resolved_by: ActorId,
    ) -> Result<Conflict> {
        let mut entry = self
            .conflicts
            .get_mut(&conflict_id)
            .ok_or_else(|| CoreError::not_found("conflict", conflict_id.to_string()))?;

        if entry.status == ConflictStatus::Resolved {
            return Err(CoreError::new(
                ErrorCode::ConflictAlreadyResolved,
                format!("Conflict {} is already resolved", conflict_id),
            ));
        }

        entry.status = ConflictStatus::Resolved;
        entry.resolution_strategy = Some(strategy);
        entry.resolution_event_id = Some(resolution_event_id);
        entry.resolved_by = Some(resolved_by);
        entry.resolved_at = Some(Utc::now());

        info!(
            conflict_id = %conflict_id,
            strategy = %strategy,
            resolution_event_id = %resolution_event_id,
            "conflict resolved"
        );
        Ok(entry.clone())
    }
}

impl Default for ConflictManager {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
