//! The ledger core facade.
//!
//! [`LedgerCore`] wires the schema registry, event store, conflict manager,
//! annotation store, grant registry, and access engine together and exposes
//! the operations callers use. Every operation takes an explicit
//! [`CallerContext`]; there is no ambient identity anywhere below this
//! surface.

use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::access::{
    deidentify, AccessControlEngine, BreakGlassGrant, CallerContext, GrantRegistry,
    ResourceAttrs, RoleAssignment, RoleKind,
};
use crate::annotations::{Annotation, AnnotationId, AnnotationKind, AnnotationStore};
use crate::audit::AuditLog;
use crate::config::CoreConfig;
use crate::conflicts::{Conflict, ConflictId, ConflictManager};
use crate::error::{CoreError, ErrorCode, Result};
use crate::events::{
    ActorId, AggregateId, EventDraft, EventRecord, EventStore, IntegrityCheckpoint, Payload,
    ResolutionMarker, ResolutionStrategy, ScopeId,
};
use crate::projection::{AggregateState, FoldOutcome};
use crate::validation::{PayloadSchema, SchemaRegistry};

/// Actor recorded for actions the system performs on its own behalf.
const SYSTEM_ACTOR: &str = "system";

/// What happened to a submitted event.
#[derive(Debug, Clone)]
pub enum AppendOutcome {
    /// The event was appended and folded into the aggregate state.
    Accepted { event: EventRecord, version: u64 },

    /// The event was appended and chain-hashed, but its causal parent did
    /// not match the folded head; a conflict record was opened instead.
    Conflicted { event: EventRecord, conflict: Conflict },
}

impl AppendOutcome {
    pub fn event(&self) -> &EventRecord {
        match self {
            Self::Accepted { event, .. } | Self::Conflicted { event, .. } => event,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LedgerCore
// ═══════════════════════════════════════════════════════════════════════════════

pub struct LedgerCore {
    store: EventStore,
    conflicts: ConflictManager,
    annotations: AnnotationStore,
    schemas: SchemaRegistry,
    grants: Arc<GrantRegistry>,
    engine: AccessControlEngine,
    audit: Arc<AuditLog>,
    break_glass_max_ttl: Duration,
    bootstrapped: AtomicBool,
}

impl LedgerCore {
    pub fn new(config: CoreConfig) -> Self {
        let grants = Arc::new(GrantRegistry::new());
        let audit = Arc::new(AuditLog::new(&config.audit));
        let engine = AccessControlEngine::new(
            config.access.clone(),
            Arc::clone(&grants),
            Arc::clone(&audit),
        );

        Self {
            store: EventStore::new(&config.store),
            conflicts: ConflictManager::new(),
            annotations: AnnotationStore::new(),
            schemas: SchemaRegistry::with_defaults(),
            grants,
            engine,
            audit,
            break_glass_max_ttl: config.access.break_glass_max_ttl,
            bootstrapped: AtomicBool::new(false),
        }
    }

    /// Register an additional payload schema.
    pub fn register_schema(&self, schema: PayloadSchema) {
        self.schemas.register(schema);
    }

    /// The audit trail of authorization decisions.
    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    /// Seed the first sponsor. Callable exactly once, at deployment time,
    /// before any context can exist to authorize it.
    pub fn bootstrap_sponsor(&self, actor_id: ActorId) -> Result<RoleAssignment> {
        if self.bootstrapped.swap(true, Ordering::SeqCst) {
            return Err(CoreError::unauthorized(
                "A sponsor has already been bootstrapped",
            ));
        }
        let assignment = self.grants.grant_role(
            actor_id.clone(),
            RoleKind::Sponsor,
            Vec::<ScopeId>::new(),
            ActorId::new(SYSTEM_ACTOR),
        )?;
        self.record_admin_event(
            ActorId::new(SYSTEM_ACTOR),
            RoleKind::Sponsor,
            "bootstrap_sponsor",
            json!({ "target_actor": actor_id }),
        )?;
        info!(actor_id = %actor_id, "sponsor bootstrapped");
        Ok(assignment)
    }

    /// Activate a caller context for one role and at most one scope.
    pub fn activate_session(
        &self,
        actor_id: ActorId,
        role: RoleKind,
        scope: Option<ScopeId>,
    ) -> Result<CallerContext> {
        let ctx = self.grants.activate(actor_id, role, scope)?;
        self.audit.allowed(&ctx, "activate_session", None, false);
        Ok(ctx)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────────

    fn resource(&self, aggregate_id: AggregateId) -> Result<ResourceAttrs> {
        let state = self
            .store
            .current_state(aggregate_id)
            .ok_or_else(|| CoreError::not_found("aggregate", aggregate_id.to_string()))?;
        Ok(ResourceAttrs {
            aggregate_id,
            scope_id: state.scope_id,
            owner_id: state.owner_id,
        })
    }

    /// Append an administrative action to the acting actor's hash-chained
    /// admin stream under the reserved scope.
    fn record_admin_event(
        &self,
        recorded_by: ActorId,
        role: RoleKind,
        action: &str,
        details: serde_json::Value,
    ) -> Result<()> {
        let stream = AggregateId::admin_stream(&recorded_by);
        let mut data = json!({ "action": action });
        if let (Some(data), Some(details)) = (data.as_object_mut(), details.as_object()) {
            for (key, value) in details {
                data.insert(key.clone(), value.clone());
            }
        }

        let payload = Payload::new("admin_action", 1, data);
        let draft = match self.store.current_state(stream) {
            Some(state) => EventDraft::update(
                stream,
                ScopeId::admin(),
                payload,
                state.last_event_id,
                "administrative action",
            ),
            None => EventDraft::create(stream, ScopeId::admin(), payload),
        };
        // Concurrent admin actions can race the head read above; the loser
        // stays in the chain and gets a conflict record like any other event.
        let appended = self.store.append(draft, recorded_by, role)?;
        if let FoldOutcome::Diverged { head } = appended.outcome {
            self.conflicts.open(&appended.event, head);
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Writing Clinical Data
    // ─────────────────────────────────────────────────────────────────────────

    /// Validate, authorize, and append a drafted event.
    ///
    /// Drafts whose causal parent does not match the folded head are still
    /// appended and chain-hashed, but come back as
    /// [`AppendOutcome::Conflicted`] with an open conflict record.
    pub fn submit(&self, ctx: &CallerContext, draft: EventDraft) -> Result<AppendOutcome> {
        if draft.resolution.is_some() {
            return Err(CoreError::validation(
                "Resolution events are submitted through resolve_conflict",
            ));
        }
        if draft.scope_id.is_admin() {
            return Err(CoreError::validation(
                "The admin scope is reserved for administrative streams",
            ));
        }
        self.schemas.validate_draft(&draft)?;

        let attrs = match self.store.current_state(draft.aggregate_id) {
            Some(state) => {
                if state.scope_id != draft.scope_id {
                    return Err(CoreError::validation(
                        "The scope of an aggregate is fixed by its first event",
                    ));
                }
                ResourceAttrs {
                    aggregate_id: draft.aggregate_id,
                    scope_id: state.scope_id,
                    owner_id: state.owner_id,
                }
            }
            // A new aggregate belongs to whoever creates it.
            None => ResourceAttrs {
                aggregate_id: draft.aggregate_id,
                scope_id: draft.scope_id.clone(),
                owner_id: ctx.actor_id.clone(),
            },
        };
        self.engine.check_write(ctx, &attrs, "submit")?;

        let appended = self
            .store
            .append(draft, ctx.actor_id.clone(), ctx.role)?;
        Ok(match appended.outcome {
            FoldOutcome::Applied { version } => AppendOutcome::Accepted {
                event: appended.event,
                version,
            },
            FoldOutcome::Diverged { head } => {
                let conflict = self.conflicts.open(&appended.event, head);
                AppendOutcome::Conflicted {
                    event: appended.event,
                    conflict,
                }
            }
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reading
    // ─────────────────────────────────────────────────────────────────────────

    /// Current state of an aggregate, filtered per the caller's role.
    pub fn current_state(
        &self,
        ctx: &CallerContext,
        aggregate_id: AggregateId,
    ) -> Result<AggregateState> {
        let attrs = self.resource(aggregate_id)?;
        let access = self.engine.check_read(ctx, &attrs, "read_state")?;

        let state = self
            .store
            .current_state(aggregate_id)
            .ok_or_else(|| CoreError::not_found("aggregate", aggregate_id.to_string()))?;
        Ok(if access.deidentified {
            deidentify::state(&state)
        } else {
            state
        })
    }

    /// Full event history of an aggregate, in append order.
    pub fn history(
        &self,
        ctx: &CallerContext,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventRecord>> {
        let attrs = self.resource(aggregate_id)?;
        let access = self.engine.check_read(ctx, &attrs, "read_history")?;

        let events = self.store.read_stream(aggregate_id);
        Ok(if access.deidentified {
            events.iter().map(deidentify::event).collect()
        } else {
            events
        })
    }

    /// Auditor export of a full history. Requires a justification and a case
    /// reference, both of which land in the audit trail.
    pub fn export_history(
        &self,
        ctx: &CallerContext,
        aggregate_id: AggregateId,
        justification: &str,
        case_id: &str,
    ) -> Result<Vec<EventRecord>> {
        let attrs = self.resource(aggregate_id)?;
        self.engine.check_export(ctx, &attrs)?;
        if justification.trim().is_empty() {
            return Err(CoreError::validation("Exports need a justification"));
        }
        if case_id.trim().is_empty() {
            return Err(CoreError::validation("Exports need a case reference"));
        }

        self.audit.export(ctx, aggregate_id, justification, case_id);
        Ok(self.store.read_stream(aggregate_id))
    }

    /// Rebuild an aggregate's state by replaying its stream from scratch.
    pub fn rebuild_state(
        &self,
        ctx: &CallerContext,
        aggregate_id: AggregateId,
    ) -> Result<AggregateState> {
        let attrs = self.resource(aggregate_id)?;
        let access = self.engine.check_read(ctx, &attrs, "rebuild_state")?;

        let state = self
            .store
            .rebuild(aggregate_id)
            .ok_or_else(|| CoreError::not_found("aggregate", aggregate_id.to_string()))?;
        Ok(if access.deidentified {
            deidentify::state(&state)
        } else {
            state
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Integrity
    // ─────────────────────────────────────────────────────────────────────────

    /// Verify an aggregate's whole hash chain.
    pub fn verify_integrity(
        &self,
        ctx: &CallerContext,
        aggregate_id: AggregateId,
    ) -> Result<IntegrityCheckpoint> {
        let attrs = self.resource(aggregate_id)?;
        self.engine.check_read(ctx, &attrs, "verify_integrity")?;
        self.store.verify_stream(aggregate_id)
    }

    /// Verify one chunk of the chain, resumable from the returned checkpoint.
    pub fn verify_integrity_step(
        &self,
        ctx: &CallerContext,
        aggregate_id: AggregateId,
        offset: usize,
    ) -> Result<IntegrityCheckpoint> {
        let attrs = self.resource(aggregate_id)?;
        self.engine.check_read(ctx, &attrs, "verify_integrity")?;
        self.store.verify_chunk(aggregate_id, offset)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Conflicts
    // ─────────────────────────────────────────────────────────────────────────

    /// Open conflicts, narrowed to the caller's effective scope.
    pub fn list_conflicts(
        &self,
        ctx: &CallerContext,
        scope: Option<ScopeId>,
    ) -> Result<Vec<Conflict>> {
        let effective = self.engine.check_conflict_list(ctx, scope)?;
        Ok(self.conflicts.list_open(effective.as_ref()))
    }

    /// All conflicts ever recorded against one aggregate.
    pub fn conflicts_for_aggregate(
        &self,
        ctx: &CallerContext,
        aggregate_id: AggregateId,
    ) -> Result<Vec<Conflict>> {
        let attrs = self.resource(aggregate_id)?;
        self.engine.check_read(ctx, &attrs, "read_conflicts")?;
        Ok(self.conflicts.list_for_aggregate(aggregate_id))
    }

    /// Resolve an open conflict by appending an explicit resolution event.
    ///
    /// The resolution event targets the current folded head and carries the
    /// conflict id and strategy. On acceptance the conflict moves to
    /// `Resolved`; if a concurrent write races the resolution, the resolution
    /// event itself diverges, a new conflict opens, and the original stays
    /// open for another attempt.
    pub fn resolve_conflict(
        &self,
        ctx: &CallerContext,
        conflict_id: ConflictId,
        strategy: ResolutionStrategy,
        payload: Payload,
        reason: impl Into<String>,
    ) -> Result<AppendOutcome> {
        let conflict = self.conflicts.get(conflict_id)?;
        if !conflict.is_open() {
            return Err(CoreError::new(
                ErrorCode::ConflictAlreadyResolved,
                format!("Conflict {} is already resolved", conflict_id),
            ));
        }

        let state = self
            .store
            .current_state(conflict.aggregate_id)
            .ok_or_else(|| {
                CoreError::not_found("aggregate", conflict.aggregate_id.to_string())
            })?;
        let attrs = ResourceAttrs {
            aggregate_id: conflict.aggregate_id,
            scope_id: state.scope_id.clone(),
            owner_id: state.owner_id.clone(),
        };
        self.engine.check_write(ctx, &attrs, "resolve_conflict")?;

        let draft = EventDraft::update(
            conflict.aggregate_id,
            state.scope_id,
            payload,
            state.last_event_id,
            reason,
        )
        .with_resolution(ResolutionMarker {
            conflict_id,
            strategy,
        });
        self.schemas.validate_draft(&draft)?;

        let appended = self
            .store
            .append(draft, ctx.actor_id.clone(), ctx.role)?;
        Ok(match appended.outcome {
            FoldOutcome::Applied { version } => {
                self.conflicts.resolve(
                    conflict_id,
                    strategy,
                    appended.event.event_id,
                    ctx.actor_id.clone(),
                )?;
                AppendOutcome::Accepted {
                    event: appended.event,
                    version,
                }
            }
            FoldOutcome::Diverged { head } => {
                let new_conflict = self.conflicts.open(&appended.event, head);
                AppendOutcome::Conflicted {
                    event: appended.event,
                    conflict: new_conflict,
                }
            }
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Annotations
    // ─────────────────────────────────────────────────────────────────────────

    /// Attach a note or data query to an aggregate.
    pub fn add_annotation(
        &self,
        ctx: &CallerContext,
        aggregate_id: AggregateId,
        kind: AnnotationKind,
        text: impl Into<String>,
        requires_response: bool,
    ) -> Result<Annotation> {
        let attrs = self.resource(aggregate_id)?;
        self.engine.check_annotate(ctx, &attrs)?;
        self.annotations.add(
            aggregate_id,
            attrs.scope_id,
            ctx.actor_id.clone(),
            ctx.role,
            kind,
            text,
            requires_response,
        )
    }

    /// Answer an open query; the original is marked resolved via the derived
    /// index, never mutated.
    pub fn resolve_annotation(
        &self,
        ctx: &CallerContext,
        annotation_id: AnnotationId,
        text: impl Into<String>,
    ) -> Result<Annotation> {
        let original = self.annotations.get(annotation_id)?;
        let attrs = self.resource(original.aggregate_id)?;
        self.engine.check_annotate(ctx, &attrs)?;
        self.annotations
            .respond(annotation_id, ctx.actor_id.clone(), ctx.role, text)
    }

    /// All annotations on an aggregate, filtered per the caller's role.
    pub fn list_annotations(
        &self,
        ctx: &CallerContext,
        aggregate_id: AggregateId,
    ) -> Result<Vec<Annotation>> {
        let attrs = self.resource(aggregate_id)?;
        let access = self.engine.check_read(ctx, &attrs, "read_annotations")?;

        let annotations = self.annotations.list(aggregate_id);
        Ok(if access.deidentified {
            annotations.iter().map(deidentify::annotation).collect()
        } else {
            annotations
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Grant Administration
    // ─────────────────────────────────────────────────────────────────────────

    pub fn grant_role(
        &self,
        ctx: &CallerContext,
        actor_id: ActorId,
        role: RoleKind,
        scopes: Vec<ScopeId>,
    ) -> Result<RoleAssignment> {
        self.engine.check_admin(ctx, "grant_role")?;
        let assignment =
            self.grants
                .grant_role(actor_id.clone(), role, scopes.clone(), ctx.actor_id.clone())?;
        self.record_admin_event(
            ctx.actor_id.clone(),
            ctx.role,
            "grant_role",
            json!({ "target_actor": actor_id, "role": role, "scopes": scopes }),
        )?;
        Ok(assignment)
    }

    pub fn revoke_role(
        &self,
        ctx: &CallerContext,
        actor_id: &ActorId,
        role: RoleKind,
    ) -> Result<RoleAssignment> {
        self.engine.check_admin(ctx, "revoke_role")?;
        let assignment = self
            .grants
            .revoke_role(actor_id, role, ctx.actor_id.clone())?;
        self.record_admin_event(
            ctx.actor_id.clone(),
            ctx.role,
            "revoke_role",
            json!({ "target_actor": actor_id, "role": role }),
        )?;
        Ok(assignment)
    }

    /// De-assign one scope from an assignment. Effective immediately.
    pub fn revoke_scope(
        &self,
        ctx: &CallerContext,
        actor_id: &ActorId,
        role: RoleKind,
        scope: &ScopeId,
    ) -> Result<RoleAssignment> {
        self.engine.check_admin(ctx, "revoke_scope")?;
        let assignment =
            self.grants
                .revoke_scope(actor_id, role, scope, ctx.actor_id.clone())?;
        self.record_admin_event(
            ctx.actor_id.clone(),
            ctx.role,
            "revoke_scope",
            json!({ "target_actor": actor_id, "role": role, "scope": scope }),
        )?;
        Ok(assignment)
    }

    /// Issue a time-boxed break-glass grant, capped by configuration.
    pub fn grant_break_glass(
        &self,
        ctx: &CallerContext,
        actor_id: ActorId,
        ticket_id: impl Into<String>,
        ttl: Duration,
    ) -> Result<BreakGlassGrant> {
        self.engine.check_admin(ctx, "grant_break_glass")?;
        let grant = self.grants.grant_break_glass(
            actor_id.clone(),
            ticket_id,
            ttl,
            self.break_glass_max_ttl,
            ctx.actor_id.clone(),
        )?;
        self.record_admin_event(
            ctx.actor_id.clone(),
            ctx.role,
            "grant_break_glass",
            json!({
                "target_actor": actor_id,
                "ticket_id": grant.ticket_id,
                "expires_at": grant.expires_at,
            }),
        )?;
        Ok(grant)
    }

    pub fn revoke_break_glass(
        &self,
        ctx: &CallerContext,
        actor_id: &ActorId,
    ) -> Result<BreakGlassGrant> {
        self.engine.check_admin(ctx, "revoke_break_glass")?;
        let grant = self
            .grants
            .revoke_break_glass(actor_id, ctx.actor_id.clone())?;
        self.record_admin_event(
            ctx.actor_id.clone(),
            ctx.role,
            "revoke_break_glass",
            json!({ "target_actor": actor_id }),
        )?;
        Ok(grant)
    }

    /// Administrative audit stream of one actor (sponsors and auditors read
    /// these like any other aggregate via `history`, using the returned id).
    pub fn admin_stream_of(&self, actor_id: &ActorId) -> AggregateId {
        AggregateId::admin_stream(actor_id)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
