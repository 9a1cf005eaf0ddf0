//! The append-only event store.
//!
//! One hash-chained stream per aggregate. Each stream is guarded by its own
//! lock, which is the single serialization point for that aggregate: the
//! chain-head precondition, hash computation, append, and projection fold all
//! happen under it, so replaying a stream in storage order always reproduces
//! the live projection.

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{info, warn};

use crate::access::RoleKind;
use crate::config::StoreConfig;
use crate::error::{CoreError, Result};
use crate::events::event::{ActorId, AggregateId, EventDraft, EventRecord, ScopeId};
use crate::events::hash;
use crate::projection::{self, AggregateState, FoldOutcome};

// ═══════════════════════════════════════════════════════════════════════════════
// Store
// ═══════════════════════════════════════════════════════════════════════════════

struct StreamInner {
    events: Vec<EventRecord>,
    state: Option<AggregateState>,
    halted: bool,
}

impl StreamInner {
    fn new() -> Self {
        Self {
            events: Vec::new(),
            state: None,
            halted: false,
        }
    }

    fn head_chain_hash(&self) -> String {
        match self.events.last() {
            Some(event) => event.chain_hash.clone(),
            None => hash::genesis_hash(),
        }
    }
}

/// Result of a successful append: the sealed record plus what the projector
/// did with it.
#[derive(Debug, Clone)]
pub struct Appended {
    pub event: EventRecord,
    pub outcome: FoldOutcome,
}

/// Progress marker for chunked integrity verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityCheckpoint {
    pub aggregate_id: AggregateId,
    /// Offset to resume from
    pub next_offset: usize,
    /// Whether the whole stream has been verified
    pub complete: bool,
}

/// In-memory event store holding every aggregate stream.
pub struct EventStore {
    streams: DashMap<AggregateId, Arc<RwLock<StreamInner>>>,
    verify_chunk_size: usize,
}

impl EventStore {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            streams: DashMap::new(),
            verify_chunk_size: config.verify_chunk_size.max(1),
        }
    }

    fn stream(&self, aggregate_id: AggregateId) -> Option<Arc<RwLock<StreamInner>>> {
        self.streams.get(&aggregate_id).map(|s| Arc::clone(&s))
    }

    fn stream_or_create(&self, aggregate_id: AggregateId) -> Arc<RwLock<StreamInner>> {
        Arc::clone(
            &self
                .streams
                .entry(aggregate_id)
                .or_insert_with(|| Arc::new(RwLock::new(StreamInner::new()))),
        )
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Appending
    // ─────────────────────────────────────────────────────────────────────────

    /// Seal a draft and append it to its aggregate's stream.
    ///
    /// Under the stream lock: reject if the aggregate is halted, check the
    /// optional chain-head precondition, stamp the server time, compute both
    /// hashes, push the record, and fold it into the projection. Events that
    /// diverge from the projected head are still appended and chain-hashed;
    /// the returned [`FoldOutcome`] tells the caller whether a conflict must
    /// be recorded.
    pub fn append(
        &self,
        draft: EventDraft,
        actor_id: ActorId,
        actor_role: RoleKind,
    ) -> Result<Appended> {
        let stream = self.stream_or_create(draft.aggregate_id);
        let mut inner = stream.write();

        if inner.halted {
            return Err(CoreError::aggregate_halted(draft.aggregate_id.to_string()));
        }

        let head = inner.head_chain_hash();
        if let Some(ref declared) = draft.expected_prev_chain_hash {
            if *declared != head {
                return Err(CoreError::chain_precondition(declared.clone(), head));
            }
        }

        let content_hash = hash::content_hash(&draft.payload)?;
        let prev = inner.events.last().map(|e| e.chain_hash.as_str());
        let chain_hash = hash::chain_hash(&content_hash, prev);

        let event = EventRecord {
            event_id: draft.event_id,
            aggregate_id: draft.aggregate_id,
            scope_id: draft.scope_id,
            operation: draft.operation,
            payload: draft.payload,
            actor_id,
            actor_role,
            client_time: draft.client_time,
            server_time: Utc::now(),
            causal_parent_id: draft.causal_parent_id,
            reason: draft.reason,
            resolution: draft.resolution,
            content_hash,
            chain_hash,
        };

        inner.events.push(event.clone());
        let outcome = projection::fold(&mut inner.state, &event);

        match &outcome {
            FoldOutcome::Applied { version } => {
                info!(
                    event_id = %event.event_id,
                    aggregate_id = %event.aggregate_id,
                    operation = %event.operation,
                    version,
                    "event appended"
                );
            }
            FoldOutcome::Diverged { .. } => {
                warn!(
                    event_id = %event.event_id,
                    aggregate_id = %event.aggregate_id,
                    operation = %event.operation,
                    "event appended but diverged from projected head"
                );
            }
        }

        Ok(Appended { event, outcome })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reading
    // ─────────────────────────────────────────────────────────────────────────

    /// Current projected state of an aggregate, if it exists.
    pub fn current_state(&self, aggregate_id: AggregateId) -> Option<AggregateState> {
        self.stream(aggregate_id)
            .and_then(|s| s.read().state.clone())
    }

    /// Whether any events exist for an aggregate.
    pub fn contains(&self, aggregate_id: AggregateId) -> bool {
        self.stream(aggregate_id)
            .map(|s| !s.read().events.is_empty())
            .unwrap_or(false)
    }

    /// Number of events in an aggregate's stream.
    pub fn stream_len(&self, aggregate_id: AggregateId) -> usize {
        self.stream(aggregate_id)
            .map(|s| s.read().events.len())
            .unwrap_or(0)
    }

    /// Chain hash of the stream head (genesis value for an empty stream).
    pub fn head_chain_hash(&self, aggregate_id: AggregateId) -> String {
        self.stream(aggregate_id)
            .map(|s| s.read().head_chain_hash())
            .unwrap_or_else(hash::genesis_hash)
    }

    /// Scope an aggregate's events belong to.
    pub fn scope_of(&self, aggregate_id: AggregateId) -> Option<ScopeId> {
        self.stream(aggregate_id)
            .and_then(|s| s.read().events.first().map(|e| e.scope_id.clone()))
    }

    /// Whether appends to the aggregate are halted pending investigation.
    pub fn is_halted(&self, aggregate_id: AggregateId) -> bool {
        self.stream(aggregate_id)
            .map(|s| s.read().halted)
            .unwrap_or(false)
    }

    /// Read a slice of the stream in storage order.
    pub fn read_chunk(
        &self,
        aggregate_id: AggregateId,
        offset: usize,
        limit: usize,
    ) -> Vec<EventRecord> {
        match self.stream(aggregate_id) {
            Some(stream) => {
                let inner = stream.read();
                inner
                    .events
                    .iter()
                    .skip(offset)
                    .take(limit)
                    .cloned()
                    .collect()
            }
            None => Vec::new(),
        }
    }

    /// Read a whole stream in storage order.
    pub fn read_stream(&self, aggregate_id: AggregateId) -> Vec<EventRecord> {
        self.read_chunk(aggregate_id, 0, usize::MAX)
    }

    /// Lazy reader over a stream, restartable from any offset.
    pub fn reader(&self, aggregate_id: AggregateId) -> StreamReader<'_> {
        self.reader_from(aggregate_id, 0)
    }

    /// Lazy reader starting at `offset` (e.g. to resume a prior read).
    pub fn reader_from(&self, aggregate_id: AggregateId, offset: usize) -> StreamReader<'_> {
        StreamReader {
            store: self,
            aggregate_id,
            offset,
            chunk: self.verify_chunk_size,
            buffer: VecDeque::new(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Integrity Verification
    // ─────────────────────────────────────────────────────────────────────────

    /// Verify one chunk of a stream's hash chain, resuming from `offset`.
    ///
    /// Recomputes each event's content hash from its stored payload and each
    /// chain link from its predecessor. On a mismatch the aggregate is halted
    /// for further appends and an [`crate::ErrorCode::IntegrityViolation`]
    /// error reports the first bad position. The condition is never repaired
    /// here; investigation is a human process.
    pub fn verify_chunk(
        &self,
        aggregate_id: AggregateId,
        offset: usize,
    ) -> Result<IntegrityCheckpoint> {
        let stream = self
            .stream(aggregate_id)
            .ok_or_else(|| CoreError::not_found("aggregate", aggregate_id.to_string()))?;
        let mut inner = stream.write();

        let len = inner.events.len();
        let end = len.min(offset.saturating_add(self.verify_chunk_size));
        let mut prev = if offset == 0 {
            None
        } else {
            inner
                .events
                .get(offset - 1)
                .map(|e| e.chain_hash.clone())
        };

        for position in offset..end {
            let (intact, chain) = {
                let event = &inner.events[position];
                let content = hash::content_hash(&event.payload)?;
                let expected_chain = hash::chain_hash(&content, prev.as_deref());
                let intact = content == event.content_hash && expected_chain == event.chain_hash;
                (intact, event.chain_hash.clone())
            };

            if !intact {
                inner.halted = true;
                let err = CoreError::integrity_violation(aggregate_id.to_string(), position as u64);
                err.log();
                return Err(err);
            }
            prev = Some(chain);
        }

        Ok(IntegrityCheckpoint {
            aggregate_id,
            next_offset: end,
            complete: end == len,
        })
    }

    /// Verify an entire stream, chunk by chunk.
    pub fn verify_stream(&self, aggregate_id: AggregateId) -> Result<IntegrityCheckpoint> {
        let mut checkpoint = self.verify_chunk(aggregate_id, 0)?;
        while !checkpoint.complete {
            checkpoint = self.verify_chunk(aggregate_id, checkpoint.next_offset)?;
        }
        Ok(checkpoint)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Replay
    // ─────────────────────────────────────────────────────────────────────────

    /// Rebuild an aggregate's state by replaying its stream from scratch.
    ///
    /// Applies the same causal check the live fold applies, so events that
    /// diverged at append time are skipped again and the result matches the
    /// stored projection.
    pub fn rebuild(&self, aggregate_id: AggregateId) -> Option<AggregateState> {
        self.stream(aggregate_id)
            .and_then(|s| projection::rebuild(&s.read().events))
    }

    #[cfg(test)]
    fn corrupt_payload(&self, aggregate_id: AggregateId, position: usize) {
        let stream = self.stream(aggregate_id).expect("stream exists");
        let mut inner = stream.write();
        inner.events[position].payload.data = serde_json::json!({"tampered": true});
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Stream Reader
// ═══════════════════════════════════════════════════════════════════════════════

/// Lazy, chunked iterator over an aggregate stream.
///
/// Holds no stream lock between chunks; [`StreamReader::position`] gives the
/// offset to restart from if iteration is abandoned.
pub struct StreamReader<'a> {
    store: &'a EventStore,
    aggregate_id: AggregateId,
    offset: usize,
    chunk: usize,
    buffer: VecDeque<EventRecord>,
}

impl StreamReader<'_> {
    /// Offset of the next unread event.
    pub fn position(&self) -> usize {
        self.offset - self.buffer.len()
    }
}

impl Iterator for StreamReader<'_> {
    type Item = EventRecord;

    fn next(&mut self) -> Option<EventRecord> {
        if self.buffer.is_empty() {
            let fetched = self.store.read_chunk(self.aggregate_id, self.offset, self.chunk);
            self.offset += fetched.len();
            self.buffer.extend(fetched);
        }
        self.buffer.pop_front()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event::{EventDraft, Payload};
    use serde_json::json;

    fn store() -> EventStore {
        EventStore::new(&StoreConfig {
            verify_chunk_size: 4,
        })
    }

    fn diary(text: &str) -> Payload {
        Payload::new("diary_entry", 1, json!({"entry_date": "2026-03-01", "text": text}))
    }

    fn seed(store: &EventStore, n: usize) -> (AggregateId, Vec<EventRecord>) {
        let aggregate_id = AggregateId::new();
        let scope = ScopeId::new("site-a");
        let mut events = Vec::new();

        let first = store
            .append(
                EventDraft::create(aggregate_id, scope.clone(), diary("entry 0")),
                ActorId::new("subject-1"),
                RoleKind::Subject,
            )
            .unwrap();
        events.push(first.event);

        for i in 1..n {
            let parent = events.last().unwrap().event_id;
            let appended = store
                .append(
                    EventDraft::update(
                        aggregate_id,
                        scope.clone(),
                        diary(&format!("entry {}", i)),
                        parent,
                        "correction",
                    ),
                    ActorId::new("subject-1"),
                    RoleKind::Subject,
                )
                .unwrap();
            events.push(appended.event);
        }
        (aggregate_id, events)
    }

    #[test]
    fn test_append_extends_chain() {
        let store = store();
        let (aggregate_id, events) = seed(&store, 3);

        assert_eq!(store.stream_len(aggregate_id), 3);
        assert_eq!(events[0].causal_parent_id, None);
        for pair in events.windows(2) {
            let expected =
                hash::chain_hash(&pair[1].content_hash, Some(pair[0].chain_hash.as_str()));
            assert_eq!(pair[1].chain_hash, expected);
        }
        assert_eq!(store.head_chain_hash(aggregate_id), events[2].chain_hash);
    }

    #[test]
    fn test_diverged_event_is_stored_but_not_folded() {
        let store = store();
        let (aggregate_id, events) = seed(&store, 2);

        // Second writer still believes event 0 is the head.
        let stale = store
            .append(
                EventDraft::update(
                    aggregate_id,
                    ScopeId::new("site-a"),
                    diary("stale"),
                    events[0].event_id,
                    "late sync",
                ),
                ActorId::new("subject-1"),
                RoleKind::Subject,
            )
            .unwrap();

        assert!(matches!(stale.outcome, FoldOutcome::Diverged { .. }));
        // Appended and chained all the same.
        assert_eq!(store.stream_len(aggregate_id), 3);
        assert_eq!(store.head_chain_hash(aggregate_id), stale.event.chain_hash);
        // Projection still points at the accepted head.
        let state = store.current_state(aggregate_id).unwrap();
        assert_eq!(state.last_event_id, events[1].event_id);
        assert_eq!(state.version, 2);
    }

    #[test]
    fn test_expected_head_precondition() {
        let store = store();
        let (aggregate_id, events) = seed(&store, 2);

        let draft = EventDraft::update(
            aggregate_id,
            ScopeId::new("site-a"),
            diary("guarded"),
            events[1].event_id,
            "correction",
        )
        .with_expected_head(events[0].chain_hash.clone());

        let err = store
            .append(draft, ActorId::new("subject-1"), RoleKind::Subject)
            .unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::ChainPreconditionFailed);
        assert_eq!(store.stream_len(aggregate_id), 2);
    }

    #[test]
    fn test_verify_detects_tamper_and_halts() {
        let store = store();
        let (aggregate_id, _) = seed(&store, 8);

        store.corrupt_payload(aggregate_id, 5);

        let err = store.verify_stream(aggregate_id).unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::IntegrityViolation);
        assert_eq!(
            err.details().context.get("position"),
            Some(&serde_json::json!(5))
        );
        assert!(store.is_halted(aggregate_id));

        // Halted aggregates reject further appends.
        let state = store.current_state(aggregate_id).unwrap();
        let err = store
            .append(
                EventDraft::update(
                    aggregate_id,
                    ScopeId::new("site-a"),
                    diary("after halt"),
                    state.last_event_id,
                    "correction",
                ),
                ActorId::new("subject-1"),
                RoleKind::Subject,
            )
            .unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::AggregateHalted);
    }

    #[test]
    fn test_verify_resumes_from_checkpoint() {
        let store = store();
        let (aggregate_id, _) = seed(&store, 10);

        let first = store.verify_chunk(aggregate_id, 0).unwrap();
        assert_eq!(first.next_offset, 4);
        assert!(!first.complete);

        let second = store.verify_chunk(aggregate_id, first.next_offset).unwrap();
        let third = store.verify_chunk(aggregate_id, second.next_offset).unwrap();
        assert_eq!(third.next_offset, 10);
        assert!(third.complete);
    }

    #[test]
    fn test_reader_restarts_from_position() {
        let store = store();
        let (aggregate_id, events) = seed(&store, 10);

        let mut reader = store.reader(aggregate_id);
        let head: Vec<_> = reader.by_ref().take(3).collect();
        assert_eq!(head[2].event_id, events[2].event_id);

        let resume_at = reader.position();
        let rest: Vec<_> = store.reader_from(aggregate_id, resume_at).collect();
        assert_eq!(rest.len(), 7);
        assert_eq!(rest[0].event_id, events[3].event_id);
    }

    #[test]
    fn test_rebuild_matches_live_projection() {
        let store = store();
        let (aggregate_id, events) = seed(&store, 5);

        // Sprinkle in a diverged event; replay must skip it the same way.
        store
            .append(
                EventDraft::update(
                    aggregate_id,
                    ScopeId::new("site-a"),
                    diary("stale"),
                    events[1].event_id,
                    "late sync",
                ),
                ActorId::new("subject-1"),
                RoleKind::Subject,
            )
            .unwrap();

        let live = store.current_state(aggregate_id).unwrap();
        let rebuilt = store.rebuild(aggregate_id).unwrap();
        assert_eq!(live, rebuilt);
    }
}
