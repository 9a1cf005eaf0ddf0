//! The authorization decision engine.
//!
//! Every decision is made against the caller context passed in, the live
//! grant registry, and the target resource's attributes. Decisions are not
//! cached: a revoked scope or expired break-glass grant fails the very next
//! call. Every decision, allowed or denied, goes to the audit log.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::access::context::CallerContext;
use crate::access::grants::{GrantRegistry, RoleAssignment};
use crate::access::roles::ReadScope;
use crate::audit::AuditLog;
use crate::config::AccessConfig;
use crate::error::{CoreError, Result};
use crate::events::event::{ActorId, AggregateId, ScopeId};

// ═══════════════════════════════════════════════════════════════════════════════
// Decision Inputs and Outputs
// ═══════════════════════════════════════════════════════════════════════════════

/// The attributes of an aggregate that access decisions depend on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceAttrs {
    pub aggregate_id: AggregateId,
    pub scope_id: ScopeId,
    pub owner_id: ActorId,
}

/// A granted read, with the obligations attached to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadAccess {
    /// Direct identifiers must be stripped from everything returned
    pub deidentified: bool,

    /// A live break-glass grant backed this read
    pub via_break_glass: bool,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Engine
// ═══════════════════════════════════════════════════════════════════════════════

pub struct AccessControlEngine {
    config: AccessConfig,
    grants: Arc<GrantRegistry>,
    audit: Arc<AuditLog>,
}

impl AccessControlEngine {
    pub fn new(config: AccessConfig, grants: Arc<GrantRegistry>, audit: Arc<AuditLog>) -> Self {
        Self {
            config,
            grants,
            audit,
        }
    }

    fn deny(
        &self,
        ctx: &CallerContext,
        action: &str,
        aggregate_id: Option<AggregateId>,
        reason: String,
    ) -> CoreError {
        self.audit.denied(ctx, action, aggregate_id, &reason);
        CoreError::unauthorized(reason)
    }

    /// Break-glass contexts are only as good as their grant is right now.
    fn break_glass_live(
        &self,
        ctx: &CallerContext,
        action: &str,
        aggregate_id: Option<AggregateId>,
    ) -> Result<()> {
        match self.grants.live_break_glass(&ctx.actor_id, Utc::now()) {
            Ok(_) => Ok(()),
            Err(err) => Err(self.deny(
                ctx,
                action,
                aggregate_id,
                format!("break-glass grant unusable: {}", err.message()),
            )),
        }
    }

    /// Re-validate the context against the live registry.
    ///
    /// Revocations take effect immediately, so an already-activated context
    /// whose assignment (or selected scope) was revoked fails here on its
    /// next call. Returns whether a break-glass grant backed the decision.
    fn context_live(
        &self,
        ctx: &CallerContext,
        action: &str,
        aggregate_id: Option<AggregateId>,
    ) -> Result<bool> {
        if ctx.role.requires_live_grant() {
            self.break_glass_live(ctx, action, aggregate_id)?;
            return Ok(true);
        }

        let live = self
            .grants
            .assignment(&ctx.actor_id, ctx.role)
            .filter(RoleAssignment::is_active)
            .map(|a| match &ctx.scope {
                Some(scope) => a.scopes.contains(scope),
                None => true,
            })
            .unwrap_or(false);
        if !live {
            return Err(self.deny(
                ctx,
                action,
                aggregate_id,
                format!(
                    "{} assignment for {} is no longer active",
                    ctx.role, ctx.actor_id
                ),
            ));
        }
        Ok(false)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Authorize reading an aggregate's state, history, or annotations.
    pub fn check_read(
        &self,
        ctx: &CallerContext,
        resource: &ResourceAttrs,
        action: &str,
    ) -> Result<ReadAccess> {
        let via_break_glass = self.context_live(ctx, action, Some(resource.aggregate_id))?;

        match ctx.role.read_scope() {
            ReadScope::OwnAggregates => {
                if resource.owner_id != ctx.actor_id {
                    return Err(self.deny(
                        ctx,
                        action,
                        Some(resource.aggregate_id),
                        "record belongs to another subject".to_string(),
                    ));
                }
            }
            ReadScope::AssignedScope => {
                if !ctx.covers_scope(&resource.scope_id) {
                    return Err(self.deny(
                        ctx,
                        action,
                        Some(resource.aggregate_id),
                        format!("scope {} is outside the active context", resource.scope_id),
                    ));
                }
            }
            ReadScope::AllScopes => {}
        }

        self.audit
            .allowed(ctx, action, Some(resource.aggregate_id), via_break_glass);
        Ok(ReadAccess {
            deidentified: ctx.role.deidentified_reads(),
            via_break_glass,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────────

    /// Authorize appending a clinical event to an aggregate.
    ///
    /// With write protection disabled in configuration the capability check
    /// is skipped; the decision is still audited.
    pub fn check_write(
        &self,
        ctx: &CallerContext,
        resource: &ResourceAttrs,
        action: &str,
    ) -> Result<()> {
        if !self.config.enforce_write_protection {
            self.audit
                .allowed(ctx, action, Some(resource.aggregate_id), false);
            return Ok(());
        }
        self.context_live(ctx, action, Some(resource.aggregate_id))?;

        if !ctx.role.may_write_core() {
            return Err(self.deny(
                ctx,
                action,
                Some(resource.aggregate_id),
                format!("role {} may not write clinical data", ctx.role),
            ));
        }
        if resource.owner_id != ctx.actor_id {
            return Err(self.deny(
                ctx,
                action,
                Some(resource.aggregate_id),
                "subjects may only modify their own records".to_string(),
            ));
        }

        self.audit
            .allowed(ctx, action, Some(resource.aggregate_id), false);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Annotations, Export, Administration
    // ─────────────────────────────────────────────────────────────────────────

    /// Authorize adding an annotation (note or data query).
    pub fn check_annotate(&self, ctx: &CallerContext, resource: &ResourceAttrs) -> Result<()> {
        self.context_live(ctx, "annotate", Some(resource.aggregate_id))?;
        if !ctx.role.may_annotate() {
            return Err(self.deny(
                ctx,
                "annotate",
                Some(resource.aggregate_id),
                format!("role {} may not annotate", ctx.role),
            ));
        }
        if !ctx.covers_scope(&resource.scope_id) {
            return Err(self.deny(
                ctx,
                "annotate",
                Some(resource.aggregate_id),
                format!("scope {} is outside the active context", resource.scope_id),
            ));
        }
        self.audit
            .allowed(ctx, "annotate", Some(resource.aggregate_id), false);
        Ok(())
    }

    /// Authorize a full-history export. The allowed path is recorded by the
    /// caller through [`AuditLog::export`] so the justification travels with
    /// the entry.
    pub fn check_export(&self, ctx: &CallerContext, resource: &ResourceAttrs) -> Result<()> {
        self.context_live(ctx, "export_history", Some(resource.aggregate_id))?;
        if !ctx.role.may_export() {
            return Err(self.deny(
                ctx,
                "export_history",
                Some(resource.aggregate_id),
                format!("role {} may not export histories", ctx.role),
            ));
        }
        Ok(())
    }

    /// Authorize grant administration.
    pub fn check_admin(&self, ctx: &CallerContext, action: &str) -> Result<()> {
        self.context_live(ctx, action, None)?;
        if !ctx.role.may_administer() {
            return Err(self.deny(
                ctx,
                action,
                None,
                format!("role {} may not administer access", ctx.role),
            ));
        }
        self.audit.allowed(ctx, action, None, false);
        Ok(())
    }

    /// Authorize listing conflicts and return the effective scope filter:
    /// scope-bound roles are pinned to their activated scope, global roles
    /// may pass any filter or none.
    pub fn check_conflict_list(
        &self,
        ctx: &CallerContext,
        requested: Option<ScopeId>,
    ) -> Result<Option<ScopeId>> {
        self.context_live(ctx, "list_conflicts", None)?;
        let effective = match ctx.role.read_scope() {
            ReadScope::AllScopes => requested,
            ReadScope::AssignedScope => match requested {
                None => ctx.scope.clone(),
                Some(scope) if ctx.covers_scope(&scope) => Some(scope),
                Some(scope) => {
                    return Err(self.deny(
                        ctx,
                        "list_conflicts",
                        None,
                        format!("scope {} is outside the active context", scope),
                    ));
                }
            },
            ReadScope::OwnAggregates => {
                return Err(self.deny(
                    ctx,
                    "list_conflicts",
                    None,
                    format!("role {} may not list conflicts by scope", ctx.role),
                ));
            }
        };

        self.audit.allowed(ctx, "list_conflicts", None, false);
        Ok(effective)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::roles::RoleKind;
    use crate::config::AuditConfig;
    use std::time::Duration;

    fn engine(enforce: bool) -> (AccessControlEngine, Arc<GrantRegistry>, Arc<AuditLog>) {
        let grants = Arc::new(GrantRegistry::new());
        let audit = Arc::new(AuditLog::new(&AuditConfig {
            capacity: 64,
            record_allowed: true,
        }));
        let config = AccessConfig {
            enforce_write_protection: enforce,
            break_glass_max_ttl: Duration::from_secs(4 * 3600),
        };
        (
            AccessControlEngine::new(config, Arc::clone(&grants), Arc::clone(&audit)),
            grants,
            audit,
        )
    }

    fn resource(owner: &str, scope: &str) -> ResourceAttrs {
        ResourceAttrs {
            aggregate_id: AggregateId::new(),
            scope_id: ScopeId::new(scope),
            owner_id: ActorId::new(owner),
        }
    }

    /// Register an assignment and hand back a matching context.
    fn granted_ctx(
        grants: &GrantRegistry,
        actor: &str,
        role: RoleKind,
        scopes: &[&str],
    ) -> CallerContext {
        grants
            .grant_role(
                ActorId::new(actor),
                role,
                scopes.iter().map(|s| ScopeId::new(*s)),
                ActorId::new("sponsor-1"),
            )
            .unwrap();
        let scope = scopes.first().map(|s| ScopeId::new(*s));
        grants.activate(ActorId::new(actor), role, scope).unwrap()
    }

    #[test]
    fn test_subject_reads_and_writes_own_records_only() {
        let (engine, grants, audit) = engine(true);
        let ctx = granted_ctx(&grants, "subject-1", RoleKind::Subject, &[]);

        let own = resource("subject-1", "site-a");
        assert!(engine.check_write(&ctx, &own, "submit").is_ok());
        assert!(!engine.check_read(&ctx, &own, "read_state").unwrap().deidentified);

        let other = resource("subject-2", "site-a");
        assert!(engine.check_write(&ctx, &other, "submit").is_err());
        assert!(engine.check_read(&ctx, &other, "read_state").is_err());
        assert_eq!(audit.denials().len(), 2);
    }

    #[test]
    fn test_scope_bound_read_is_pinned_to_context() {
        let (engine, grants, audit) = engine(true);
        let ctx = granted_ctx(&grants, "inv-1", RoleKind::Investigator, &["site-a"]);

        assert!(engine
            .check_read(&ctx, &resource("subject-1", "site-a"), "read_state")
            .is_ok());
        let err = engine
            .check_read(&ctx, &resource("subject-9", "site-b"), "read_state")
            .unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::Unauthorized);
        assert_eq!(audit.denials().len(), 1);
    }

    #[test]
    fn test_analyst_reads_are_deidentified() {
        let (engine, grants, _) = engine(true);
        let ctx = granted_ctx(&grants, "analyst-1", RoleKind::Analyst, &["site-a"]);
        let access = engine
            .check_read(&ctx, &resource("subject-1", "site-a"), "read_state")
            .unwrap();
        assert!(access.deidentified);
    }

    #[test]
    fn test_investigator_never_writes_core_data() {
        let (engine, grants, _) = engine(true);
        let ctx = granted_ctx(&grants, "inv-1", RoleKind::Investigator, &["site-a"]);
        assert!(engine
            .check_write(&ctx, &resource("subject-1", "site-a"), "submit")
            .is_err());
        assert!(engine
            .check_annotate(&ctx, &resource("subject-1", "site-a"))
            .is_ok());
    }

    #[test]
    fn test_write_protection_flag_disables_write_checks_only() {
        let (engine, grants, _) = engine(false);
        let ctx = granted_ctx(&grants, "inv-1", RoleKind::Investigator, &["site-a"]);
        // Write check waved through.
        assert!(engine
            .check_write(&ctx, &resource("subject-1", "site-a"), "submit")
            .is_ok());
        // Read filtering still applies.
        assert!(engine
            .check_read(&ctx, &resource("subject-1", "site-b"), "read_state")
            .is_err());
    }

    #[test]
    fn test_break_glass_requires_live_grant_per_call() {
        let (engine, grants, _) = engine(true);
        let ctx = CallerContext::new(ActorId::new("oncall-1"), RoleKind::BreakGlass, None);
        let res = resource("subject-1", "site-a");

        // No grant at all.
        assert!(engine.check_read(&ctx, &res, "read_state").is_err());

        grants
            .grant_break_glass(
                ActorId::new("oncall-1"),
                "INC-7",
                Duration::from_secs(600),
                Duration::from_secs(3600),
                ActorId::new("sponsor-1"),
            )
            .unwrap();
        let access = engine.check_read(&ctx, &res, "read_state").unwrap();
        assert!(access.via_break_glass);

        // Revocation cuts off the very next call, same context.
        grants
            .revoke_break_glass(&ActorId::new("oncall-1"), ActorId::new("sponsor-1"))
            .unwrap();
        assert!(engine.check_read(&ctx, &res, "read_state").is_err());
    }

    #[test]
    fn test_conflict_listing_scope_rules() {
        let (engine, grants, _) = engine(true);

        let auditor = granted_ctx(&grants, "aud-1", RoleKind::Auditor, &[]);
        assert_eq!(engine.check_conflict_list(&auditor, None).unwrap(), None);

        let inv = granted_ctx(&grants, "inv-1", RoleKind::Investigator, &["site-a"]);
        assert_eq!(
            engine.check_conflict_list(&inv, None).unwrap(),
            Some(ScopeId::new("site-a"))
        );
        assert!(engine
            .check_conflict_list(&inv, Some(ScopeId::new("site-b")))
            .is_err());
    }

    #[test]
    fn test_revocation_invalidates_existing_contexts() {
        let (engine, grants, _) = engine(true);
        let ctx = granted_ctx(&grants, "inv-1", RoleKind::Investigator, &["site-a"]);
        let res = resource("subject-1", "site-a");
        assert!(engine.check_read(&ctx, &res, "read_state").is_ok());

        grants
            .revoke_role(
                &ActorId::new("inv-1"),
                RoleKind::Investigator,
                ActorId::new("sponsor-1"),
            )
            .unwrap();

        // Same already-activated context, next call fails.
        let err = engine.check_read(&ctx, &res, "read_state").unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::Unauthorized);
    }
}
