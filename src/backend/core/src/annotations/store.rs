//! Annotation records and their store.
//!
//! Annotations attach commentary to an aggregate without entering its event
//! stream or altering its state. They are append-only: a data query is
//! "resolved" by appending a response that references it, never by mutating
//! the original record. The resolved flag callers see is derived from that
//! reference index at read time.

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;
use uuid::Uuid;

use crate::access::RoleKind;
use crate::error::{CoreError, Result};
use crate::events::event::{ActorId, AggregateId, ScopeId};

// ═══════════════════════════════════════════════════════════════════════════════
// Annotation Record
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique identifier for an annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnotationId(pub Uuid);

impl AnnotationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AnnotationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AnnotationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of commentary an annotation carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationKind {
    /// Free-form remark
    Note,
    /// A formal data query expecting a response
    Query,
}

/// One annotation on an aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    pub annotation_id: AnnotationId,
    pub aggregate_id: AggregateId,
    pub scope_id: ScopeId,
    pub author_id: ActorId,
    pub author_role: RoleKind,
    pub kind: AnnotationKind,
    pub text: String,
    pub requires_response: bool,
    pub created_at: DateTime<Utc>,

    /// Set when this annotation answers an earlier query
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responds_to: Option<AnnotationId>,

    /// Derived at read time: whether a response referencing this annotation
    /// exists. Stored records always carry `false`.
    pub resolved: bool,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Annotation Store
// ═══════════════════════════════════════════════════════════════════════════════

/// Store of annotation records plus the derived resolution index.
pub struct AnnotationStore {
    records: DashMap<AnnotationId, Annotation>,
    by_aggregate: DashMap<AggregateId, Vec<AnnotationId>>,
    responded: DashSet<AnnotationId>,
}

impl AnnotationStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            by_aggregate: DashMap::new(),
            responded: DashSet::new(),
        }
    }

    /// Append a new annotation.
    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &self,
        aggregate_id: AggregateId,
        scope_id: ScopeId,
        author_id: ActorId,
        author_role: RoleKind,
        kind: AnnotationKind,
        text: impl Into<String>,
        requires_response: bool,
    ) -> Result<Annotation> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(CoreError::validation("Annotation text must not be empty"));
        }

        let annotation = Annotation {
            annotation_id: AnnotationId::new(),
            aggregate_id,
            scope_id,
            author_id,
            author_role,
            kind,
            text,
            requires_response,
            created_at: Utc::now(),
            responds_to: None,
            resolved: false,
        };

        info!(
            annotation_id = %annotation.annotation_id,
            aggregate_id = %annotation.aggregate_id,
            kind = ?annotation.kind,
            requires_response = annotation.requires_response,
            "annotation added"
        );

        self.index(annotation.clone());
        Ok(annotation)
    }

    /// Append a response to an open query, marking it resolved in the index.
    ///
    /// The original record is untouched; later reads of it report
    /// `resolved: true` because this response exists.
    pub fn respond(
        &self,
        original_id: AnnotationId,
        author_id: ActorId,
        author_role: RoleKind,
        text: impl Into<String>,
    ) -> Result<Annotation> {
        let original = self.get(original_id)?;
        if !original.requires_response {
            return Err(CoreError::validation(
                "Annotation does not expect a response",
            ));
        }
        if self.responded.contains(&original_id) {
            return Err(CoreError::validation("Query has already been resolved"));
        }
        let text = text.into();
        if text.trim().is_empty() {
            return Err(CoreError::validation("Response text must not be empty"));
        }

        let response = Annotation {
            annotation_id: AnnotationId::new(),
            aggregate_id: original.aggregate_id,
            scope_id: original.scope_id.clone(),
            author_id,
            author_role,
            kind: original.kind,
            text,
            requires_response: false,
            created_at: Utc::now(),
            responds_to: Some(original_id),
            resolved: false,
        };

        info!(
            annotation_id = %response.annotation_id,
            responds_to = %original_id,
            aggregate_id = %response.aggregate_id,
            "query resolved by response"
        );

        self.index(response.clone());
        self.responded.insert(original_id);
        Ok(response)
    }

    fn index(&self, annotation: Annotation) {
        self.by_aggregate
            .entry(annotation.aggregate_id)
            .or_default()
            .push(annotation.annotation_id);
        self.records.insert(annotation.annotation_id, annotation);
    }

    /// Fetch one annotation with its derived resolved flag.
    pub fn get(&self, annotation_id: AnnotationId) -> Result<Annotation> {
        let mut annotation = self
            .records
            .get(&annotation_id)
            .map(|a| a.clone())
            .ok_or_else(|| CoreError::not_found("annotation", annotation_id.to_string()))?;
        annotation.resolved = self.responded.contains(&annotation_id);
        Ok(annotation)
    }

    /// All annotations on an aggregate, in creation order, with derived
    /// resolved flags.
    pub fn list(&self, aggregate_id: AggregateId) -> Vec<Annotation> {
        self.by_aggregate
            .get(&aggregate_id)
            .map(|ids| ids.iter().filter_map(|id| self.get(*id).ok()).collect())
            .unwrap_or_default()
    }

    /// Open queries on an aggregate still awaiting a response.
    pub fn open_queries(&self, aggregate_id: AggregateId) -> Vec<Annotation> {
        self.list(aggregate_id)
            .into_iter()
            .filter(|a| a.requires_response && !a.resolved)
            .collect()
    }
}

impl Default for AnnotationStore {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
