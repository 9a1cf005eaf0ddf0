//! Role assignments and break-glass grants.
//!
//! The registry is the live source of truth for who may activate which role.
//! Revocations take effect immediately: there is no grace period and no
//! cached decision to outlive them. Break-glass grants additionally expire on
//! their own and are re-validated by the engine on every access.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::access::context::CallerContext;
use crate::access::roles::{ReadScope, RoleKind};
use crate::error::{CoreError, ErrorCode, Result};
use crate::events::event::{ActorId, ScopeId};

// ═══════════════════════════════════════════════════════════════════════════════
// Grant Records
// ═══════════════════════════════════════════════════════════════════════════════

/// A standing assignment of one role to one actor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub actor_id: ActorId,
    pub role: RoleKind,

    /// Scopes the assignment covers; empty for roles that are not scope-bound
    pub scopes: BTreeSet<ScopeId>,

    pub granted_by: ActorId,
    pub granted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_by: Option<ActorId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
}

impl RoleAssignment {
    pub fn is_active(&self) -> bool {
        self.revoked_at.is_none()
    }
}

/// A time-boxed emergency-access grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakGlassGrant {
    pub grant_id: Uuid,
    pub actor_id: ActorId,

    /// Incident or ticket reference justifying the grant
    pub ticket_id: String,

    pub granted_by: ActorId,
    pub granted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_by: Option<ActorId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
}

impl BreakGlassGrant {
    /// Whether the grant authorizes access at `now`. Checked on every call,
    /// not cached at activation.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.granted_at <= now && now < self.expires_at
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Grant Registry
// ═══════════════════════════════════════════════════════════════════════════════

/// In-memory registry of role assignments and break-glass grants.
pub struct GrantRegistry {
    assignments: DashMap<(ActorId, RoleKind), RoleAssignment>,
    break_glass: DashMap<ActorId, BreakGlassGrant>,
}

impl GrantRegistry {
    pub fn new() -> Self {
        Self {
            assignments: DashMap::new(),
            break_glass: DashMap::new(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Role Assignments
    // ─────────────────────────────────────────────────────────────────────────

    /// Assign a role, replacing any previous assignment of the same role.
    pub fn grant_role(
        &self,
        actor_id: ActorId,
        role: RoleKind,
        scopes: impl IntoIterator<Item = ScopeId>,
        granted_by: ActorId,
    ) -> Result<RoleAssignment> {
        if role == RoleKind::BreakGlass {
            return Err(CoreError::validation(
                "Break-glass access is granted as a time-boxed grant, not a role assignment",
            ));
        }

        let scopes: BTreeSet<ScopeId> = scopes.into_iter().collect();
        if role.read_scope() == ReadScope::AssignedScope && scopes.is_empty() {
            return Err(CoreError::validation(
                "Scope-bound roles need at least one scope",
            ));
        }

        let assignment = RoleAssignment {
            actor_id: actor_id.clone(),
            role,
            scopes,
            granted_by,
            granted_at: Utc::now(),
            revoked_by: None,
            revoked_at: None,
        };
        info!(actor_id = %actor_id, role = %role, "role granted");
        self.assignments
            .insert((actor_id, role), assignment.clone());
        Ok(assignment)
    }

    /// Revoke a role assignment entirely. Effective immediately.
    pub fn revoke_role(
        &self,
        actor_id: &ActorId,
        role: RoleKind,
        revoked_by: ActorId,
    ) -> Result<RoleAssignment> {
        let mut entry = self
            .assignments
            .get_mut(&(actor_id.clone(), role))
            .filter(|a| a.is_active())
            .ok_or_else(|| {
                CoreError::new(
                    ErrorCode::GrantNotFound,
                    format!("No active {} assignment for {}", role, actor_id),
                )
            })?;

        entry.revoked_by = Some(revoked_by);
        entry.revoked_at = Some(Utc::now());
        warn!(actor_id = %actor_id, role = %role, "role revoked");
        Ok(entry.clone())
    }

    /// Remove one scope from an assignment (site de-assignment). Effective
    /// immediately; the assignment itself stays active for its other scopes.
    pub fn revoke_scope(
        &self,
        actor_id: &ActorId,
        role: RoleKind,
        scope: &ScopeId,
        revoked_by: ActorId,
    ) -> Result<RoleAssignment> {
        let mut entry = self
            .assignments
            .get_mut(&(actor_id.clone(), role))
            .filter(|a| a.is_active())
            .ok_or_else(|| {
                CoreError::new(
                    ErrorCode::GrantNotFound,
                    format!("No active {} assignment for {}", role, actor_id),
                )
            })?;

        if !entry.scopes.remove(scope) {
            return Err(CoreError::new(
                ErrorCode::ScopeNotGranted,
                format!("Scope {} is not part of the assignment", scope),
            ));
        }
        warn!(actor_id = %actor_id, role = %role, scope = %scope, revoked_by = %revoked_by, "scope revoked from assignment");
        Ok(entry.clone())
    }

    pub fn assignment(&self, actor_id: &ActorId, role: RoleKind) -> Option<RoleAssignment> {
        self.assignments
            .get(&(actor_id.clone(), role))
            .map(|a| a.clone())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Break-Glass Grants
    // ─────────────────────────────────────────────────────────────────────────

    /// Issue a break-glass grant, replacing any previous grant for the actor.
    pub fn grant_break_glass(
        &self,
        actor_id: ActorId,
        ticket_id: impl Into<String>,
        ttl: Duration,
        max_ttl: Duration,
        granted_by: ActorId,
    ) -> Result<BreakGlassGrant> {
        let ticket_id = ticket_id.into();
        if ticket_id.trim().is_empty() {
            return Err(CoreError::validation(
                "Break-glass grants need a ticket reference",
            ));
        }
        if ttl > max_ttl {
            return Err(CoreError::validation(format!(
                "Requested TTL {:?} exceeds the configured maximum {:?}",
                ttl, max_ttl
            )));
        }
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|_| CoreError::validation("Break-glass TTL is out of range"))?;

        let granted_at = Utc::now();
        let grant = BreakGlassGrant {
            grant_id: Uuid::new_v4(),
            actor_id: actor_id.clone(),
            ticket_id,
            granted_by,
            granted_at,
            expires_at: granted_at + ttl,
            revoked_by: None,
            revoked_at: None,
        };
        warn!(
            actor_id = %actor_id,
            grant_id = %grant.grant_id,
            ticket_id = %grant.ticket_id,
            expires_at = %grant.expires_at,
            "break-glass grant issued"
        );
        self.break_glass.insert(actor_id, grant.clone());
        Ok(grant)
    }

    /// Revoke an actor's break-glass grant. Effective immediately.
    pub fn revoke_break_glass(
        &self,
        actor_id: &ActorId,
        revoked_by: ActorId,
    ) -> Result<BreakGlassGrant> {
        let mut entry = self
            .break_glass
            .get_mut(actor_id)
            .filter(|g| g.revoked_at.is_none())
            .ok_or_else(|| {
                CoreError::new(
                    ErrorCode::GrantNotFound,
                    format!("No break-glass grant for {}", actor_id),
                )
            })?;

        entry.revoked_by = Some(revoked_by);
        entry.revoked_at = Some(Utc::now());
        warn!(actor_id = %actor_id, grant_id = %entry.grant_id, "break-glass grant revoked");
        Ok(entry.clone())
    }

    /// The actor's break-glass grant, if it authorizes access right now.
    ///
    /// Distinguishes missing, expired, and revoked grants so audit output
    /// says why emergency access stopped working.
    pub fn live_break_glass(
        &self,
        actor_id: &ActorId,
        now: DateTime<Utc>,
    ) -> Result<BreakGlassGrant> {
        let grant = self
            .break_glass
            .get(actor_id)
            .map(|g| g.clone())
            .ok_or_else(|| {
                CoreError::new(
                    ErrorCode::GrantNotFound,
                    format!("No break-glass grant for {}", actor_id),
                )
            })?;

        if grant.revoked_at.is_some() {
            return Err(CoreError::new(
                ErrorCode::GrantRevoked,
                format!("Break-glass grant for {} was revoked", actor_id),
            ));
        }
        if now >= grant.expires_at {
            return Err(CoreError::new(
                ErrorCode::GrantExpired,
                format!("Break-glass grant for {} expired", actor_id),
            ));
        }
        if now < grant.granted_at {
            return Err(CoreError::new(
                ErrorCode::GrantNotFound,
                format!("Break-glass grant for {} is not yet active", actor_id),
            ));
        }
        Ok(grant)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Session Activation
    // ─────────────────────────────────────────────────────────────────────────

    /// Activate a caller context for one role and at most one scope.
    ///
    /// Scope-bound roles must end up with exactly one scope: an explicit
    /// selection from the assignment, or the assignment's only scope.
    pub fn activate(
        &self,
        actor_id: ActorId,
        role: RoleKind,
        scope: Option<ScopeId>,
    ) -> Result<CallerContext> {
        if role == RoleKind::BreakGlass {
            // Liveness is re-checked per call; activation just requires a
            // currently live grant.
            self.live_break_glass(&actor_id, Utc::now())?;
            if scope.is_some() {
                return Err(CoreError::validation(
                    "Break-glass contexts do not take a scope selection",
                ));
            }
            return Ok(CallerContext::new(actor_id, role, None));
        }

        let assignment = self
            .assignment(&actor_id, role)
            .filter(|a| a.is_active())
            .ok_or_else(|| {
                CoreError::unauthorized(format!("{} holds no active {} role", actor_id, role))
            })?;

        let scope = match role.read_scope() {
            ReadScope::AssignedScope => match scope {
                Some(scope) => {
                    if !assignment.scopes.contains(&scope) {
                        return Err(CoreError::new(
                            ErrorCode::ScopeNotGranted,
                            format!("Scope {} is not granted to {}", scope, actor_id),
                        ));
                    }
                    Some(scope)
                }
                None if assignment.scopes.len() == 1 => {
                    assignment.scopes.iter().next().cloned()
                }
                None => {
                    return Err(CoreError::validation(
                        "A single scope must be selected for this role",
                    ));
                }
            },
            ReadScope::OwnAggregates | ReadScope::AllScopes => {
                if scope.is_some() {
                    return Err(CoreError::validation(
                        "This role does not take a scope selection",
                    ));
                }
                None
            }
        };

        Ok(CallerContext::new(actor_id, role, scope))
    }
}

impl Default for GrantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn sponsor() -> ActorId {
        ActorId::new("sponsor-1")
    }

    #[test]
    fn test_scope_selection_rules() {
        let registry = GrantRegistry::new();
        registry
            .grant_role(
                ActorId::new("inv-1"),
                RoleKind::Investigator,
                [ScopeId::new("site-a"), ScopeId::new("site-b")],
                sponsor(),
            )
            .unwrap();

        // Two scopes granted, none selected.
        let err = registry
            .activate(ActorId::new("inv-1"), RoleKind::Investigator, None)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationFailed);

        // Ungranted scope.
        let err = registry
            .activate(
                ActorId::new("inv-1"),
                RoleKind::Investigator,
                Some(ScopeId::new("site-c")),
            )
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ScopeNotGranted);

        let ctx = registry
            .activate(
                ActorId::new("inv-1"),
                RoleKind::Investigator,
                Some(ScopeId::new("site-a")),
            )
            .unwrap();
        assert!(ctx.covers_scope(&ScopeId::new("site-a")));
        assert!(!ctx.covers_scope(&ScopeId::new("site-b")));
    }

    #[test]
    fn test_single_scope_auto_selected() {
        let registry = GrantRegistry::new();
        registry
            .grant_role(
                ActorId::new("analyst-1"),
                RoleKind::Analyst,
                [ScopeId::new("site-a")],
                sponsor(),
            )
            .unwrap();
        let ctx = registry
            .activate(ActorId::new("analyst-1"), RoleKind::Analyst, None)
            .unwrap();
        assert_eq!(ctx.scope, Some(ScopeId::new("site-a")));
    }

    #[test]
    fn test_revocation_is_immediate() {
        let registry = GrantRegistry::new();
        registry
            .grant_role(
                ActorId::new("inv-1"),
                RoleKind::Investigator,
                [ScopeId::new("site-a")],
                sponsor(),
            )
            .unwrap();
        registry
            .revoke_role(&ActorId::new("inv-1"), RoleKind::Investigator, sponsor())
            .unwrap();

        let err = registry
            .activate(ActorId::new("inv-1"), RoleKind::Investigator, None)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unauthorized);
    }

    #[test]
    fn test_scope_deassignment_keeps_other_scopes() {
        let registry = GrantRegistry::new();
        registry
            .grant_role(
                ActorId::new("inv-1"),
                RoleKind::Investigator,
                [ScopeId::new("site-a"), ScopeId::new("site-b")],
                sponsor(),
            )
            .unwrap();
        registry
            .revoke_scope(
                &ActorId::new("inv-1"),
                RoleKind::Investigator,
                &ScopeId::new("site-b"),
                sponsor(),
            )
            .unwrap();

        assert!(registry
            .activate(
                ActorId::new("inv-1"),
                RoleKind::Investigator,
                Some(ScopeId::new("site-b")),
            )
            .is_err());
        assert!(registry
            .activate(ActorId::new("inv-1"), RoleKind::Investigator, None)
            .is_ok());
    }

    #[test]
    fn test_break_glass_lifecycle() {
        let registry = GrantRegistry::new();
        let max = Duration::from_secs(4 * 3600);

        // TTL over the ceiling.
        let err = registry
            .grant_break_glass(
                ActorId::new("oncall-1"),
                "INC-100",
                Duration::from_secs(5 * 3600),
                max,
                sponsor(),
            )
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationFailed);

        let grant = registry
            .grant_break_glass(
                ActorId::new("oncall-1"),
                "INC-100",
                Duration::from_secs(3600),
                max,
                sponsor(),
            )
            .unwrap();

        assert!(registry
            .live_break_glass(&ActorId::new("oncall-1"), Utc::now())
            .is_ok());
        // Expired by the clock.
        let err = registry
            .live_break_glass(
                &ActorId::new("oncall-1"),
                grant.expires_at + chrono::Duration::seconds(1),
            )
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::GrantExpired);

        registry
            .revoke_break_glass(&ActorId::new("oncall-1"), sponsor())
            .unwrap();
        let err = registry
            .live_break_glass(&ActorId::new("oncall-1"), Utc::now())
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::GrantRevoked);
    }

    #[test]
    fn test_break_glass_unusable_before_grant_start() {
        let registry = GrantRegistry::new();
        let grant = registry
            .grant_break_glass(
                ActorId::new("oncall-1"),
                "INC-101",
                Duration::from_secs(3600),
                Duration::from_secs(4 * 3600),
                sponsor(),
            )
            .unwrap();

        let before_start = grant.granted_at - chrono::Duration::seconds(5);
        assert!(!grant.is_live(before_start));
        let err = registry
            .live_break_glass(&ActorId::new("oncall-1"), before_start)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::GrantNotFound);
    }

    #[test]
    fn test_break_glass_is_not_a_role_assignment() {
        let registry = GrantRegistry::new();
        let err = registry
            .grant_role(
                ActorId::new("oncall-1"),
                RoleKind::BreakGlass,
                Vec::<ScopeId>::new(),
                sponsor(),
            )
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationFailed);
    }
}
