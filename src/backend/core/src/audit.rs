//! The access audit trail.
//!
//! Every authorization decision lands here: denials unconditionally, allowed
//! decisions when configured. Exports additionally carry the auditor's
//! justification and case reference. Entries also go to the `audit` tracing
//! target so they reach the structured log stream; free text is redacted
//! before it gets anywhere near a sink.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{info, warn};

use crate::access::context::CallerContext;
use crate::access::roles::RoleKind;
use crate::config::AuditConfig;
use crate::events::event::{ActorId, AggregateId, ScopeId};
use crate::telemetry;

/// One recorded authorization decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    pub actor_id: ActorId,
    pub role: RoleKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<ScopeId>,

    /// The operation that was attempted, e.g. `"read_state"`
    pub action: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregate_id: Option<AggregateId>,

    pub allowed: bool,

    /// Why a denial happened, redacted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Whether a live break-glass grant backed the decision
    pub via_break_glass: bool,

    /// Auditor's justification, present on export entries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub justification: Option<String>,

    /// Audit case reference, present on export entries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case_id: Option<String>,
}

impl AuditEntry {
    fn decision(ctx: &CallerContext, action: &str, aggregate_id: Option<AggregateId>) -> Self {
        Self {
            at: Utc::now(),
            actor_id: ctx.actor_id.clone(),
            role: ctx.role,
            scope: ctx.scope.clone(),
            action: action.to_string(),
            aggregate_id,
            allowed: true,
            reason: None,
            via_break_glass: false,
            justification: None,
            case_id: None,
        }
    }
}

/// Bounded in-memory audit log.
pub struct AuditLog {
    entries: RwLock<VecDeque<AuditEntry>>,
    capacity: usize,
    record_allowed: bool,
}

impl AuditLog {
    pub fn new(config: &AuditConfig) -> Self {
        Self {
            entries: RwLock::new(VecDeque::new()),
            capacity: config.capacity.max(1),
            record_allowed: config.record_allowed,
        }
    }

    /// Record an allowed decision.
    pub fn allowed(
        &self,
        ctx: &CallerContext,
        action: &str,
        aggregate_id: Option<AggregateId>,
        via_break_glass: bool,
    ) {
        let mut entry = AuditEntry::decision(ctx, action, aggregate_id);
        entry.via_break_glass = via_break_glass;

        info!(
            target: "audit",
            actor_id = %entry.actor_id,
            role = %entry.role,
            action = %entry.action,
            aggregate_id = ?entry.aggregate_id,
            via_break_glass = entry.via_break_glass,
            "access allowed"
        );
        if self.record_allowed {
            self.push(entry);
        }
    }

    /// Record an allowed export with its justification and case reference.
    pub fn export(
        &self,
        ctx: &CallerContext,
        aggregate_id: AggregateId,
        justification: &str,
        case_id: &str,
    ) {
        let mut entry = AuditEntry::decision(ctx, "export_history", Some(aggregate_id));
        entry.justification = Some(telemetry::redact_free_text(justification));
        entry.case_id = Some(case_id.to_string());

        info!(
            target: "audit",
            actor_id = %entry.actor_id,
            aggregate_id = %aggregate_id,
            case_id = %case_id,
            "history exported"
        );
        // Exports are always retained, independent of record_allowed.
        self.push(entry);
    }

    /// Record a denial. Denials are always retained.
    pub fn denied(
        &self,
        ctx: &CallerContext,
        action: &str,
        aggregate_id: Option<AggregateId>,
        reason: &str,
    ) {
        let mut entry = AuditEntry::decision(ctx, action, aggregate_id);
        entry.allowed = false;
        entry.reason = Some(telemetry::redact_free_text(reason));

        warn!(
            target: "audit",
            actor_id = %entry.actor_id,
            role = %entry.role,
            action = %entry.action,
            aggregate_id = ?entry.aggregate_id,
            reason = %entry.reason.as_deref().unwrap_or(""),
            "access denied"
        );
        self.push(entry);
    }

    fn push(&self, entry: AuditEntry) {
        let mut entries = self.entries.write();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// All retained entries, oldest first.
    pub fn snapshot(&self) -> Vec<AuditEntry> {
        self.entries.read().iter().cloned().collect()
    }

    /// Retained denials, oldest first.
    pub fn denials(&self) -> Vec<AuditEntry> {
        self.entries
            .read()
            .iter()
            .filter(|e| !e.allowed)
            .cloned()
            .collect()
    }

    /// The most recent `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<AuditEntry> {
        let entries = self.entries.read();
        entries
            .iter()
            .skip(entries.len().saturating_sub(n))
            .cloned()
            .collect()
    }
}
