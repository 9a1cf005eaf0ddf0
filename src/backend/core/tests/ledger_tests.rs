//! End-to-end tests of the ledger core: event sourcing, conflicts, access
//! control, break-glass, annotations, and the audit trail.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use veritas_core::{
    ActorId, AggregateId, AnnotationKind, AppendOutcome, ConflictStatus, CoreConfig, ErrorCode,
    EventDraft, LedgerCore, Payload, ResolutionStrategy, RoleKind, ScopeId,
};

const SITE_A: &str = "site-a";
const SITE_B: &str = "site-b";

fn diary(text: &str) -> Payload {
    Payload::new(
        "diary_entry",
        1,
        json!({"entry_date": "2026-03-01", "text": text}),
    )
}

/// Core with a sponsor, subjects and site staff for two sites.
fn harness() -> LedgerCore {
    let core = LedgerCore::new(CoreConfig::default());
    core.bootstrap_sponsor(ActorId::new("sponsor-1")).unwrap();
    let sponsor = core
        .activate_session(ActorId::new("sponsor-1"), RoleKind::Sponsor, None)
        .unwrap();

    core.grant_role(&sponsor, ActorId::new("subject-1"), RoleKind::Subject, vec![])
        .unwrap();
    core.grant_role(&sponsor, ActorId::new("subject-2"), RoleKind::Subject, vec![])
        .unwrap();
    core.grant_role(
        &sponsor,
        ActorId::new("inv-1"),
        RoleKind::Investigator,
        vec![ScopeId::new(SITE_A)],
    )
    .unwrap();
    core.grant_role(
        &sponsor,
        ActorId::new("analyst-1"),
        RoleKind::Analyst,
        vec![ScopeId::new(SITE_A)],
    )
    .unwrap();
    core.grant_role(&sponsor, ActorId::new("auditor-1"), RoleKind::Auditor, vec![])
        .unwrap();
    core
}

fn subject(core: &LedgerCore, actor: &str) -> veritas_core::CallerContext {
    core.activate_session(ActorId::new(actor), RoleKind::Subject, None)
        .unwrap()
}

/// Create an aggregate for subject-1 in site-a and return its id and the
/// latest accepted event id.
fn seed_aggregate(core: &LedgerCore, text: &str) -> (AggregateId, veritas_core::EventId) {
    let ctx = subject(core, "subject-1");
    let aggregate_id = AggregateId::new();
    let outcome = core
        .submit(
            &ctx,
            EventDraft::create(aggregate_id, ScopeId::new(SITE_A), diary(text)),
        )
        .unwrap();
    let event_id = outcome.event().event_id;
    assert!(outcome.is_accepted());
    (aggregate_id, event_id)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Event Sourcing and Replay
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn replay_reproduces_live_state_including_skipped_conflicts() {
    let core = harness();
    let ctx = subject(&core, "subject-1");
    let (aggregate_id, create_id) = seed_aggregate(&core, "day 1");

    // A clean update, then a stale one that conflicts.
    let accepted = core
        .submit(
            &ctx,
            EventDraft::update(
                aggregate_id,
                ScopeId::new(SITE_A),
                diary("day 1, corrected"),
                create_id,
                "typo fix",
            ),
        )
        .unwrap();
    let stale = core
        .submit(
            &ctx,
            EventDraft::update(
                aggregate_id,
                ScopeId::new(SITE_A),
                diary("day 1, from offline device"),
                create_id,
                "late sync",
            ),
        )
        .unwrap();
    assert!(accepted.is_accepted());
    assert!(!stale.is_accepted());

    let live = core.current_state(&ctx, aggregate_id).unwrap();
    let rebuilt = core.rebuild_state(&ctx, aggregate_id).unwrap();
    assert_eq!(live, rebuilt);
    assert_eq!(live.version, 2);
    assert_eq!(live.current_payload.data["text"], "day 1, corrected");

    // The diverged event is still in the history, hash-chained.
    let history = core.history(&ctx, aggregate_id).unwrap();
    assert_eq!(history.len(), 3);
    let verified = core.verify_integrity(&ctx, aggregate_id).unwrap();
    assert!(verified.complete);
}

#[test]
fn deletion_is_a_marker_not_an_erasure() {
    let core = harness();
    let ctx = subject(&core, "subject-1");
    let (aggregate_id, create_id) = seed_aggregate(&core, "to be withdrawn");

    core.submit(
        &ctx,
        EventDraft::delete(
            aggregate_id,
            ScopeId::new(SITE_A),
            diary("to be withdrawn"),
            create_id,
            "participant withdrew consent for this entry",
        ),
    )
    .unwrap();

    let state = core.current_state(&ctx, aggregate_id).unwrap();
    assert!(state.deleted);
    assert_eq!(state.current_payload.data["text"], "to be withdrawn");
    assert_eq!(core.history(&ctx, aggregate_id).unwrap().len(), 2);
}

#[test]
fn updates_require_a_reason() {
    let core = harness();
    let ctx = subject(&core, "subject-1");
    let (aggregate_id, create_id) = seed_aggregate(&core, "day 1");

    let mut draft = EventDraft::update(
        aggregate_id,
        ScopeId::new(SITE_A),
        diary("day 1 edited"),
        create_id,
        "placeholder",
    );
    draft.reason = None;
    let err = core.submit(&ctx, draft).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ReasonRequired);
}

// ═══════════════════════════════════════════════════════════════════════════════
// Concurrency: Same-Parent Race
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn same_parent_race_folds_exactly_one_writer() {
    let core = Arc::new(harness());
    let ctx = subject(&core, "subject-1");
    let (aggregate_id, create_id) = seed_aggregate(&core, "day 1");

    let mut handles = Vec::new();
    for device in 0..2 {
        let core = Arc::clone(&core);
        let ctx = ctx.clone();
        handles.push(std::thread::spawn(move || {
            core.submit(
                &ctx,
                EventDraft::update(
                    aggregate_id,
                    ScopeId::new(SITE_A),
                    diary(&format!("from device {}", device)),
                    create_id,
                    "device sync",
                ),
            )
            .unwrap()
        }));
    }
    let outcomes: Vec<AppendOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let accepted = outcomes.iter().filter(|o| o.is_accepted()).count();
    assert_eq!(accepted, 1);

    // Both events are in the stream; one open conflict records the loser.
    assert_eq!(core.history(&ctx, aggregate_id).unwrap().len(), 3);
    let conflicts = core.conflicts_for_aggregate(&ctx, aggregate_id).unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].status, ConflictStatus::Open);

    let state = core.current_state(&ctx, aggregate_id).unwrap();
    assert_eq!(state.version, 2);
}

// ═══════════════════════════════════════════════════════════════════════════════
// Conflict Lifecycle
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn conflict_is_recorded_queryable_and_resolved_once() {
    let core = harness();
    let ctx = subject(&core, "subject-1");

    // Version A, then B and C both derived from A.
    let (aggregate_id, a) = seed_aggregate(&core, "version A");
    let b = core
        .submit(
            &ctx,
            EventDraft::update(
                aggregate_id,
                ScopeId::new(SITE_A),
                diary("version B"),
                a,
                "edit from phone",
            ),
        )
        .unwrap();
    let c = core
        .submit(
            &ctx,
            EventDraft::update(
                aggregate_id,
                ScopeId::new(SITE_A),
                diary("version C"),
                a,
                "edit from tablet",
            ),
        )
        .unwrap();

    // B folded; C is a durable conflict referencing both sides.
    let AppendOutcome::Conflicted { event, conflict } = &c else {
        panic!("expected a conflict");
    };
    assert_eq!(conflict.incoming_event_id, event.event_id);
    assert_eq!(conflict.incoming_event.payload.data["text"], "version C");
    assert_eq!(conflict.competing_head_id, Some(b.event().event_id));

    // Visible to site staff via scope listing.
    let investigator = core
        .activate_session(ActorId::new("inv-1"), RoleKind::Investigator, None)
        .unwrap();
    let open = core.list_conflicts(&investigator, None).unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].conflict_id, conflict.conflict_id);

    // The subject resolves with a manual merge.
    let resolution = core
        .resolve_conflict(
            &ctx,
            conflict.conflict_id,
            ResolutionStrategy::Merged,
            diary("versions B and C merged"),
            "reconciled both devices",
        )
        .unwrap();
    assert!(resolution.is_accepted());

    let state = core.current_state(&ctx, aggregate_id).unwrap();
    assert_eq!(state.current_payload.data["text"], "versions B and C merged");
    assert!(core.list_conflicts(&investigator, None).unwrap().is_empty());

    let resolved = &core.conflicts_for_aggregate(&ctx, aggregate_id).unwrap()[0];
    assert_eq!(resolved.status, ConflictStatus::Resolved);
    assert_eq!(resolved.resolution_strategy, Some(ResolutionStrategy::Merged));
    assert_eq!(
        resolved.resolution_event_id,
        Some(resolution.event().event_id)
    );

    // Resolution is one-shot.
    let err = core
        .resolve_conflict(
            &ctx,
            conflict.conflict_id,
            ResolutionStrategy::AcceptStored,
            diary("again"),
            "retry",
        )
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ConflictAlreadyResolved);

    // The resolution event is marked in the stream.
    let history = core.history(&ctx, aggregate_id).unwrap();
    let marker = history.last().unwrap().resolution.as_ref().unwrap();
    assert_eq!(marker.conflict_id, conflict.conflict_id);
    assert_eq!(marker.strategy, ResolutionStrategy::Merged);
}

// ═══════════════════════════════════════════════════════════════════════════════
// Access Control
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn out_of_scope_read_is_denied_and_audited() {
    let core = harness();
    let (aggregate_a, _) = seed_aggregate(&core, "site-a record");

    // A record in site-b, owned by subject-2.
    let subject2 = subject(&core, "subject-2");
    let aggregate_b = AggregateId::new();
    core.submit(
        &subject2,
        EventDraft::create(aggregate_b, ScopeId::new(SITE_B), diary("site-b record")),
    )
    .unwrap();

    let investigator = core
        .activate_session(ActorId::new("inv-1"), RoleKind::Investigator, None)
        .unwrap();
    assert!(core.current_state(&investigator, aggregate_a).is_ok());

    let denials_before = core.audit_log().denials().len();
    let err = core.current_state(&investigator, aggregate_b).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthorized);

    let denials = core.audit_log().denials();
    assert_eq!(denials.len(), denials_before + 1);
    let denial = denials.last().unwrap();
    assert_eq!(denial.actor_id, ActorId::new("inv-1"));
    assert_eq!(denial.aggregate_id, Some(aggregate_b));
    assert_eq!(denial.action, "read_state");
}

#[test]
fn subjects_cannot_touch_other_subjects_records() {
    let core = harness();
    let (aggregate_id, create_id) = seed_aggregate(&core, "subject-1's diary");

    let intruder = subject(&core, "subject-2");
    let err = core.current_state(&intruder, aggregate_id).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthorized);

    let err = core
        .submit(
            &intruder,
            EventDraft::update(
                aggregate_id,
                ScopeId::new(SITE_A),
                diary("overwritten"),
                create_id,
                "malicious edit",
            ),
        )
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthorized);
}

#[test]
fn analyst_reads_are_deidentified() {
    let core = harness();
    let ctx = subject(&core, "subject-1");
    let aggregate_id = AggregateId::new();
    core.submit(
        &ctx,
        EventDraft::create(
            aggregate_id,
            ScopeId::new(SITE_A),
            Payload::new(
                "diary_entry",
                1,
                json!({
                    "entry_date": "2026-03-01",
                    "text": "reach me at jane.doe@example.org",
                    "name": "Jane Doe",
                    "severity": 2
                }),
            ),
        ),
    )
    .unwrap();

    let analyst = core
        .activate_session(ActorId::new("analyst-1"), RoleKind::Analyst, None)
        .unwrap();
    let state = core.current_state(&analyst, aggregate_id).unwrap();
    assert!(state.current_payload.data.get("name").is_none());
    assert!(!state.current_payload.data["text"]
        .as_str()
        .unwrap()
        .contains("example.org"));
    assert_eq!(state.current_payload.data["severity"], 2);

    // Identified roles see the stored payload untouched.
    let investigator = core
        .activate_session(ActorId::new("inv-1"), RoleKind::Investigator, None)
        .unwrap();
    let state = core.current_state(&investigator, aggregate_id).unwrap();
    assert_eq!(state.current_payload.data["name"], "Jane Doe");
}

#[test]
fn investigators_write_annotations_not_clinical_data() {
    let core = harness();
    let (aggregate_id, create_id) = seed_aggregate(&core, "day 1");
    let investigator = core
        .activate_session(ActorId::new("inv-1"), RoleKind::Investigator, None)
        .unwrap();

    let err = core
        .submit(
            &investigator,
            EventDraft::update(
                aggregate_id,
                ScopeId::new(SITE_A),
                diary("investigator edit"),
                create_id,
                "correction",
            ),
        )
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthorized);

    let query = core
        .add_annotation(
            &investigator,
            aggregate_id,
            AnnotationKind::Query,
            "Entry date predates enrollment, please confirm",
            true,
        )
        .unwrap();
    assert!(!query.resolved);

    let response = core
        .resolve_annotation(&investigator, query.annotation_id, "Confirmed with participant")
        .unwrap();
    assert_eq!(response.responds_to, Some(query.annotation_id));

    let listed = core.list_annotations(&investigator, aggregate_id).unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed[0].resolved);

    // Annotations never touch the event stream or the state version.
    assert_eq!(core.history(&investigator, aggregate_id).unwrap().len(), 1);
    let state = core.current_state(&investigator, aggregate_id).unwrap();
    assert_eq!(state.version, 1);
}

#[test]
fn role_revocation_cuts_access_immediately() {
    let core = harness();
    let (aggregate_id, _) = seed_aggregate(&core, "day 1");
    let sponsor = core
        .activate_session(ActorId::new("sponsor-1"), RoleKind::Sponsor, None)
        .unwrap();
    let investigator = core
        .activate_session(ActorId::new("inv-1"), RoleKind::Investigator, None)
        .unwrap();
    assert!(core.current_state(&investigator, aggregate_id).is_ok());

    core.revoke_role(&sponsor, &ActorId::new("inv-1"), RoleKind::Investigator)
        .unwrap();

    // The already-activated context fails on its very next call.
    let err = core.current_state(&investigator, aggregate_id).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthorized);

    // And no fresh context can be activated either.
    let err = core
        .activate_session(ActorId::new("inv-1"), RoleKind::Investigator, None)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthorized);
}

#[test]
fn scope_deassignment_cuts_that_site_only() {
    let core = harness();
    let sponsor = core
        .activate_session(ActorId::new("sponsor-1"), RoleKind::Sponsor, None)
        .unwrap();
    core.grant_role(
        &sponsor,
        ActorId::new("inv-2"),
        RoleKind::Investigator,
        vec![ScopeId::new(SITE_A), ScopeId::new(SITE_B)],
    )
    .unwrap();
    let (aggregate_id, _) = seed_aggregate(&core, "day 1");

    let at_site_a = core
        .activate_session(
            ActorId::new("inv-2"),
            RoleKind::Investigator,
            Some(ScopeId::new(SITE_A)),
        )
        .unwrap();
    assert!(core.current_state(&at_site_a, aggregate_id).is_ok());

    core.revoke_scope(
        &sponsor,
        &ActorId::new("inv-2"),
        RoleKind::Investigator,
        &ScopeId::new(SITE_A),
    )
    .unwrap();

    // The site-a context dies immediately; site-b still activates.
    assert!(core.current_state(&at_site_a, aggregate_id).is_err());
    assert!(core
        .activate_session(
            ActorId::new("inv-2"),
            RoleKind::Investigator,
            Some(ScopeId::new(SITE_B)),
        )
        .is_ok());
}

// ═══════════════════════════════════════════════════════════════════════════════
// Break-Glass
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn break_glass_works_only_inside_its_temporal_bounds() {
    let core = harness();
    let (aggregate_id, _) = seed_aggregate(&core, "day 1");
    let sponsor = core
        .activate_session(ActorId::new("sponsor-1"), RoleKind::Sponsor, None)
        .unwrap();

    // Before any grant: no context can even be activated.
    let err = core
        .activate_session(ActorId::new("oncall-1"), RoleKind::BreakGlass, None)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::GrantNotFound);

    core.grant_break_glass(
        &sponsor,
        ActorId::new("oncall-1"),
        "INC-2041",
        Duration::from_millis(80),
    )
    .unwrap();

    let oncall = core
        .activate_session(ActorId::new("oncall-1"), RoleKind::BreakGlass, None)
        .unwrap();
    let state = core.current_state(&oncall, aggregate_id).unwrap();
    assert_eq!(state.current_payload.data["text"], "day 1");
    assert!(core
        .audit_log()
        .snapshot()
        .iter()
        .any(|e| e.via_break_glass && e.allowed));

    // After expiry the same context stops working.
    std::thread::sleep(Duration::from_millis(120));
    let err = core.current_state(&oncall, aggregate_id).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthorized);
}

#[test]
fn break_glass_revocation_and_ttl_ceiling() {
    let core = harness();
    let (aggregate_id, _) = seed_aggregate(&core, "day 1");
    let sponsor = core
        .activate_session(ActorId::new("sponsor-1"), RoleKind::Sponsor, None)
        .unwrap();

    // TTL above the configured 4h ceiling.
    let err = core
        .grant_break_glass(
            &sponsor,
            ActorId::new("oncall-1"),
            "INC-2042",
            Duration::from_secs(24 * 3600),
        )
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationFailed);

    core.grant_break_glass(
        &sponsor,
        ActorId::new("oncall-1"),
        "INC-2042",
        Duration::from_secs(3600),
    )
    .unwrap();
    let oncall = core
        .activate_session(ActorId::new("oncall-1"), RoleKind::BreakGlass, None)
        .unwrap();
    assert!(core.current_state(&oncall, aggregate_id).is_ok());

    core.revoke_break_glass(&sponsor, &ActorId::new("oncall-1"))
        .unwrap();
    let err = core.current_state(&oncall, aggregate_id).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthorized);
}

// ═══════════════════════════════════════════════════════════════════════════════
// Auditor Export
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn exports_need_justification_and_are_logged() {
    let core = harness();
    let (aggregate_id, _) = seed_aggregate(&core, "day 1");
    let auditor = core
        .activate_session(ActorId::new("auditor-1"), RoleKind::Auditor, None)
        .unwrap();

    let err = core
        .export_history(&auditor, aggregate_id, "  ", "CASE-77")
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationFailed);

    let events = core
        .export_history(&auditor, aggregate_id, "complaint follow-up", "CASE-77")
        .unwrap();
    assert_eq!(events.len(), 1);

    let entry = core
        .audit_log()
        .snapshot()
        .into_iter()
        .find(|e| e.action == "export_history")
        .unwrap();
    assert_eq!(entry.case_id.as_deref(), Some("CASE-77"));
    assert_eq!(entry.justification.as_deref(), Some("complaint follow-up"));

    // Other roles cannot export, even sponsors.
    let sponsor = core
        .activate_session(ActorId::new("sponsor-1"), RoleKind::Sponsor, None)
        .unwrap();
    let err = core
        .export_history(&sponsor, aggregate_id, "curiosity", "CASE-78")
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthorized);
}
