//! Event records, drafts, and the identifier newtypes shared across the core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::access::RoleKind;
use crate::conflicts::ConflictId;

// ═══════════════════════════════════════════════════════════════════════════════
// Identifiers
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique identifier for an event.
///
/// UUIDv7, so identifiers sort by creation time without leaking a separate
/// sequence counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an aggregate (one clinical record, e.g. one
/// participant's diary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateId(pub Uuid);

/// Namespace for deriving per-actor administrative streams.
const ADMIN_STREAM_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6b, 0x1d, 0x3f, 0x92, 0x5c, 0x0a, 0x4e, 0x71, 0x8f, 0x24, 0xb6, 0xd9, 0x1e, 0x47, 0xa3,
    0x58,
]);

impl AggregateId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Derive the administrative audit stream for an actor.
    ///
    /// Deterministic (UUIDv5), so every grant or revocation touching the same
    /// actor lands on the same hash-chained stream.
    pub fn admin_stream(actor: &ActorId) -> Self {
        Self(Uuid::new_v5(
            &ADMIN_STREAM_NAMESPACE,
            actor.as_str().as_bytes(),
        ))
    }
}

impl Default for AggregateId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AggregateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for an access scope (a study site or cohort).
///
/// The scope `"admin"` is reserved for administrative audit streams.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeId(pub String);

impl ScopeId {
    /// Reserved scope carrying administrative audit streams.
    pub const ADMIN: &'static str = "admin";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn admin() -> Self {
        Self(Self::ADMIN.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_admin(&self) -> bool {
        self.0 == Self::ADMIN
    }
}

impl From<&str> for ScopeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a human or system actor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub String);

impl ActorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ActorId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Operations and Payloads
// ═══════════════════════════════════════════════════════════════════════════════

/// The kind of change an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    /// Updates and deletions of clinical data must carry a reason.
    pub const fn requires_reason(&self) -> bool {
        matches!(self, Self::Update | Self::Delete)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        write!(f, "{}", s)
    }
}

/// A versioned domain payload.
///
/// `data` is schema-checked against the registered `(schema, schema_version)`
/// pair before an event is accepted. Serialization uses sorted object keys
/// (serde_json's default map), so `canonical_bytes` is stable for hashing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Registered schema name, e.g. `"diary_entry"`
    pub schema: String,

    /// Schema version the data conforms to
    pub schema_version: u32,

    /// The domain data itself
    pub data: serde_json::Value,
}

impl Payload {
    pub fn new(schema: impl Into<String>, schema_version: u32, data: serde_json::Value) -> Self {
        Self {
            schema: schema.into(),
            schema_version,
            data,
        }
    }

    /// Canonical byte serialization used for content hashing.
    pub fn canonical_bytes(&self) -> crate::error::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Conflict Resolution Markers
// ═══════════════════════════════════════════════════════════════════════════════

/// How a causal conflict was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// The incoming (conflicted) version wins
    AcceptIncoming,
    /// The stored version wins; the resolution event restates it
    AcceptStored,
    /// A manual merge of both versions
    Merged,
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AcceptIncoming => "accept_incoming",
            Self::AcceptStored => "accept_stored",
            Self::Merged => "merged",
        };
        write!(f, "{}", s)
    }
}

/// Marks an event as the resolution of a recorded conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionMarker {
    /// The conflict this event resolves
    pub conflict_id: ConflictId,

    /// The strategy applied
    pub strategy: ResolutionStrategy,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Event Record
// ═══════════════════════════════════════════════════════════════════════════════

/// A sealed, immutable event in an aggregate's stream.
///
/// Records are constructed only by the event store, which stamps the server
/// time and computes both hashes under the stream lock. Once appended a
/// record never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Globally unique event identifier
    pub event_id: EventId,

    /// The aggregate this event belongs to
    pub aggregate_id: AggregateId,

    /// Access scope of the aggregate
    pub scope_id: ScopeId,

    /// Create, update, or delete
    pub operation: Operation,

    /// Full domain payload (full-state representation, not a diff)
    pub payload: Payload,

    /// Actor who authored the change
    pub actor_id: ActorId,

    /// The single role the actor held when the change was accepted
    pub actor_role: RoleKind,

    /// Timestamp claimed by the submitting client
    pub client_time: DateTime<Utc>,

    /// Timestamp assigned at append; authoritative for ordering
    pub server_time: DateTime<Utc>,

    /// Event the author observed as latest; `None` for stream-creating events
    pub causal_parent_id: Option<EventId>,

    /// Reason for change; mandatory for updates and deletions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Present when this event resolves a recorded conflict
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ResolutionMarker>,

    /// SHA-256 of the canonical payload, hex-encoded
    pub content_hash: String,

    /// SHA-256 over `content_hash || prev_chain_hash`, hex-encoded
    pub chain_hash: String,
}

impl EventRecord {
    pub fn is_resolution(&self) -> bool {
        self.resolution.is_some()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Event Draft
// ═══════════════════════════════════════════════════════════════════════════════

/// An unsealed event as submitted by a caller.
///
/// The actor identity is deliberately absent: it is taken from the caller
/// context at submission, never from the draft.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDraft {
    pub event_id: EventId,
    pub aggregate_id: AggregateId,
    pub scope_id: ScopeId,
    pub operation: Operation,
    pub payload: Payload,
    pub client_time: DateTime<Utc>,
    pub causal_parent_id: Option<EventId>,
    pub reason: Option<String>,
    pub resolution: Option<ResolutionMarker>,

    /// Optional tamper-evidence precondition: the chain hash the client
    /// believes is the current stream head. A mismatch rejects the append
    /// before anything is written.
    pub expected_prev_chain_hash: Option<String>,
}

impl EventDraft {
    /// Draft a stream-creating event.
    pub fn create(aggregate_id: AggregateId, scope_id: ScopeId, payload: Payload) -> Self {
        Self {
            event_id: EventId::new(),
            aggregate_id,
            scope_id,
            operation: Operation::Create,
            payload,
            client_time: Utc::now(),
            causal_parent_id: None,
            reason: None,
            resolution: None,
            expected_prev_chain_hash: None,
        }
    }

    /// Draft an update against an observed parent event.
    pub fn update(
        aggregate_id: AggregateId,
        scope_id: ScopeId,
        payload: Payload,
        causal_parent_id: EventId,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            event_id: EventId::new(),
            aggregate_id,
            scope_id,
            operation: Operation::Update,
            payload,
            client_time: Utc::now(),
            causal_parent_id: Some(causal_parent_id),
            reason: Some(reason.into()),
            resolution: None,
            expected_prev_chain_hash: None,
        }
    }

    /// Draft a delete marker. The record stays in the stream; folding flags
    /// the aggregate as deleted.
    pub fn delete(
        aggregate_id: AggregateId,
        scope_id: ScopeId,
        payload: Payload,
        causal_parent_id: EventId,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            operation: Operation::Delete,
            ..Self::update(aggregate_id, scope_id, payload, causal_parent_id, reason)
        }
    }

    pub fn with_resolution(mut self, marker: ResolutionMarker) -> Self {
        self.resolution = Some(marker);
        self
    }

    pub fn with_expected_head(mut self, chain_hash: impl Into<String>) -> Self {
        self.expected_prev_chain_hash = Some(chain_hash.into());
        self
    }

    pub fn with_client_time(mut self, at: DateTime<Utc>) -> Self {
        self.client_time = at;
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
