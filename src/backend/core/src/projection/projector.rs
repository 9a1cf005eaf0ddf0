//! The fold from events to state.
//!
//! `fold` is the single place the causal check lives. The store calls it at
//! append time under the stream lock, and `rebuild` calls it again during
//! replay, so the two can never disagree about which events count.

use tracing::debug;

use crate::events::event::{EventId, EventRecord, Operation};
use crate::projection::state::AggregateState;

/// What folding one event did to the projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FoldOutcome {
    /// The event's causal parent matched the projected head and was applied.
    Applied { version: u64 },

    /// The event named a parent other than the projected head. It stays in
    /// the stream but the projection ignores it; the caller records a
    /// conflict against `head` for later resolution.
    Diverged { head: Option<EventId> },
}

/// Fold one event into the projection, applying the causal check.
///
/// An event applies when it creates the aggregate (no state, no parent) or
/// names the current folded head as its parent. Anything else diverges.
pub fn fold(state: &mut Option<AggregateState>, event: &EventRecord) -> FoldOutcome {
    match (state.as_mut(), event.causal_parent_id) {
        (None, None) => {
            let created = AggregateState {
                aggregate_id: event.aggregate_id,
                scope_id: event.scope_id.clone(),
                owner_id: event.actor_id.clone(),
                current_payload: event.payload.clone(),
                version: 1,
                last_event_id: event.event_id,
                updated_at: event.server_time,
                deleted: event.operation == Operation::Delete,
            };
            *state = Some(created);
            FoldOutcome::Applied { version: 1 }
        }

        (Some(current), Some(parent)) if parent == current.last_event_id => {
            current.version += 1;
            current.last_event_id = event.event_id;
            current.updated_at = event.server_time;
            match event.operation {
                Operation::Delete => current.deleted = true,
                Operation::Create | Operation::Update => {
                    current.current_payload = event.payload.clone();
                    current.deleted = false;
                }
            }
            FoldOutcome::Applied {
                version: current.version,
            }
        }

        (current, parent) => {
            let head = current.map(|s| s.last_event_id);
            debug!(
                event_id = %event.event_id,
                aggregate_id = %event.aggregate_id,
                claimed_parent = ?parent,
                head = ?head,
                "causal parent does not match projected head"
            );
            FoldOutcome::Diverged { head }
        }
    }
}

/// Replay a stream in storage order and return the resulting state.
///
/// Applies the identical causal check as the live fold, so events that
/// diverged at append time are skipped again and the rebuilt state equals
/// the stored one.
pub fn rebuild(events: &[EventRecord]) -> Option<AggregateState> {
    let mut state = None;
    for event in events {
        fold(&mut state, event);
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::RoleKind;
    use crate::events::event::{ActorId, AggregateId, EventId, Payload, ScopeId};
    use crate::events::hash;
    use chrono::Utc;
    use serde_json::json;

    fn record(
        aggregate_id: AggregateId,
        operation: Operation,
        parent: Option<EventId>,
        text: &str,
    ) -> EventRecord {
        let payload = Payload::new("diary_entry", 1, json!({"text": text}));
        let content_hash = hash::content_hash(&payload).unwrap();
        let chain_hash = hash::chain_hash(&content_hash, None);
        EventRecord {
            event_id: EventId::new(),
            aggregate_id,
            scope_id: ScopeId::new("site-a"),
            operation,
            payload,
            actor_id: ActorId::new("subject-1"),
            actor_role: RoleKind::Subject,
            client_time: Utc::now(),
            server_time: Utc::now(),
            causal_parent_id: parent,
            reason: None,
            resolution: None,
            content_hash,
            chain_hash,
        }
    }

    #[test]
    fn test_create_then_update_applies() {
        let aggregate_id = AggregateId::new();
        let mut state = None;

        let create = record(aggregate_id, Operation::Create, None, "day 1");
        assert_eq!(fold(&mut state, &create), FoldOutcome::Applied { version: 1 });

        let update = record(aggregate_id, Operation::Update, Some(create.event_id), "day 1 fixed");
        assert_eq!(fold(&mut state, &update), FoldOutcome::Applied { version: 2 });

        let state = state.unwrap();
        assert_eq!(state.last_event_id, update.event_id);
        assert_eq!(state.owner_id, ActorId::new("subject-1"));
        assert_eq!(state.current_payload.data["text"], "day 1 fixed");
    }

    #[test]
    fn test_stale_parent_diverges() {
        let aggregate_id = AggregateId::new();
        let mut state = None;

        let create = record(aggregate_id, Operation::Create, None, "day 1");
        fold(&mut state, &create);
        let update = record(aggregate_id, Operation::Update, Some(create.event_id), "v2");
        fold(&mut state, &update);

        // Still pointing at the create event.
        let stale = record(aggregate_id, Operation::Update, Some(create.event_id), "v2'");
        assert_eq!(
            fold(&mut state, &stale),
            FoldOutcome::Diverged {
                head: Some(update.event_id)
            }
        );
        assert_eq!(state.unwrap().version, 2);
    }

    #[test]
    fn test_parent_on_missing_aggregate_diverges() {
        let mut state = None;
        let orphan = record(
            AggregateId::new(),
            Operation::Update,
            Some(EventId::new()),
            "orphan",
        );
        assert_eq!(fold(&mut state, &orphan), FoldOutcome::Diverged { head: None });
        assert!(state.is_none());
    }

    #[test]
    fn test_delete_marks_without_erasing_payload() {
        let aggregate_id = AggregateId::new();
        let mut state = None;

        let create = record(aggregate_id, Operation::Create, None, "day 1");
        fold(&mut state, &create);
        let delete = record(aggregate_id, Operation::Delete, Some(create.event_id), "ignored");
        fold(&mut state, &delete);

        let state = state.unwrap();
        assert!(state.deleted);
        assert_eq!(state.current_payload.data["text"], "day 1");
        assert_eq!(state.version, 2);
    }

    #[test]
    fn test_rebuild_skips_diverged_events() {
        let aggregate_id = AggregateId::new();
        let create = record(aggregate_id, Operation::Create, None, "v1");
        let update = record(aggregate_id, Operation::Update, Some(create.event_id), "v2");
        let stale = record(aggregate_id, Operation::Update, Some(create.event_id), "v2'");

        let mut live = None;
        for event in [&create, &update, &stale] {
            fold(&mut live, event);
        }
        let replayed = rebuild(&[create, update, stale]);
        assert_eq!(live, replayed);
        assert_eq!(replayed.unwrap().version, 2);
    }
}
