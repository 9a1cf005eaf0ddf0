//! # Veritas Core
//!
//! Event-sourced audit and access-control core for regulated clinical data.
//!
//! Clinical records are never updated in place: every change is an immutable,
//! hash-chained event, and current state is a deterministic fold over the
//! stream. On top of the ledger sit first-class causal conflicts, append-only
//! annotations, and a role-based access engine with break-glass emergency
//! access, every decision of which is audited.
//!
//! ## Architecture
//!
//! - [`events`]: event records, hashing, and the append-only store
//! - [`projection`]: the fold from streams to current aggregate state
//! - [`conflicts`]: durable causal conflicts and their resolution
//! - [`annotations`]: notes and data queries attached to aggregates
//! - [`access`]: roles, grants, caller contexts, and the decision engine
//! - [`audit`]: the trail of authorization decisions
//! - [`validation`]: payload schema checks
//! - [`service`]: the [`LedgerCore`] facade callers use
//!
//! ## Example
//!
//! ```
//! use veritas_core::{
//!     ActorId, AggregateId, CoreConfig, EventDraft, LedgerCore, Payload, RoleKind, ScopeId,
//! };
//!
//! # fn main() -> veritas_core::Result<()> {
//! let core = LedgerCore::new(CoreConfig::default());
//! core.bootstrap_sponsor(ActorId::new("sponsor-1"))?;
//!
//! let sponsor = core.activate_session(ActorId::new("sponsor-1"), RoleKind::Sponsor, None)?;
//! core.grant_role(&sponsor, ActorId::new("subject-1"), RoleKind::Subject, vec![])?;
//!
//! let subject = core.activate_session(ActorId::new("subject-1"), RoleKind::Subject, None)?;
//! let draft = EventDraft::create(
//!     AggregateId::new(),
//!     ScopeId::new("site-a"),
//!     Payload::new(
//!         "diary_entry",
//!         1,
//!         serde_json::json!({"entry_date": "2026-03-01", "text": "slept well"}),
//!     ),
//! );
//! let outcome = core.submit(&subject, draft)?;
//! assert!(outcome.is_accepted());
//! # Ok(())
//! # }
//! ```

pub mod access;
pub mod annotations;
pub mod audit;
pub mod config;
pub mod conflicts;
pub mod error;
pub mod events;
pub mod projection;
pub mod service;
pub mod telemetry;
pub mod validation;

pub use access::{
    AccessControlEngine, BreakGlassGrant, CallerContext, GrantRegistry, ReadAccess, ReadScope,
    ResourceAttrs, RoleAssignment, RoleKind,
};
pub use annotations::{Annotation, AnnotationId, AnnotationKind, AnnotationStore};
pub use audit::{AuditEntry, AuditLog};
pub use config::CoreConfig;
pub use conflicts::{Conflict, ConflictId, ConflictManager, ConflictStatus};
pub use error::{CoreError, ErrorCode, ErrorContext, ErrorSeverity, Result};
pub use events::{
    ActorId, AggregateId, EventDraft, EventId, EventRecord, EventStore, IntegrityCheckpoint,
    Operation, Payload, ResolutionMarker, ResolutionStrategy, ScopeId,
};
pub use projection::AggregateState;
pub use service::{AppendOutcome, LedgerCore};
pub use validation::{PayloadSchema, SchemaRegistry};
