//! The caller context: one actor, one role, at most one scope.
//!
//! Contexts are built by activating a session against the grant registry and
//! are passed explicitly into every core operation. There is no ambient
//! "current user"; if an operation needs an identity, it takes a context
//! parameter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::access::roles::RoleKind;
use crate::events::event::{ActorId, ScopeId};

/// An activated caller identity.
///
/// Holding multiple roles means activating multiple contexts, one at a time.
/// Capabilities never union across an actor's assignments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallerContext {
    pub actor_id: ActorId,

    /// The single role active for this context
    pub role: RoleKind,

    /// The single scope selected at activation; `None` for roles whose reach
    /// is not scope-bound
    pub scope: Option<ScopeId>,

    /// Identifies this activation in audit output
    pub session_id: Uuid,

    pub activated_at: DateTime<Utc>,
}

impl CallerContext {
    pub(crate) fn new(actor_id: ActorId, role: RoleKind, scope: Option<ScopeId>) -> Self {
        Self {
            actor_id,
            role,
            scope,
            session_id: Uuid::new_v4(),
            activated_at: Utc::now(),
        }
    }

    /// Whether this context's scope selection covers `scope`.
    pub fn covers_scope(&self, scope: &ScopeId) -> bool {
        self.scope.as_ref() == Some(scope)
    }
}
