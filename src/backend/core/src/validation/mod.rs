//! Payload schema validation.
//!
//! Every draft is checked against the registered `(schema, schema_version)`
//! pair before authorization or persistence happens. Validation failures are
//! rejected outright and never enter a stream.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{CoreError, ErrorCode, Result};
use crate::events::event::EventDraft;

// ═══════════════════════════════════════════════════════════════════════════════
// Schemas
// ═══════════════════════════════════════════════════════════════════════════════

/// One registered payload schema version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadSchema {
    pub name: String,
    pub version: u32,

    /// Fields that must be present and non-null
    pub required_fields: Vec<String>,

    /// Upper bound on any string value in the payload
    pub max_text_len: usize,
}

impl PayloadSchema {
    pub fn new(
        name: impl Into<String>,
        version: u32,
        required_fields: impl IntoIterator<Item = &'static str>,
    ) -> Self {
        Self {
            name: name.into(),
            version,
            required_fields: required_fields.into_iter().map(String::from).collect(),
            max_text_len: 8192,
        }
    }

    fn check(&self, data: &Value) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        let Some(object) = data.as_object() else {
            issues.push(ValidationIssue {
                field: "payload.data".to_string(),
                kind: IssueKind::NotAnObject,
                message: "payload data must be a JSON object".to_string(),
            });
            return issues;
        };

        for field in &self.required_fields {
            match object.get(field) {
                None | Some(Value::Null) => issues.push(ValidationIssue {
                    field: field.clone(),
                    kind: IssueKind::MissingField,
                    message: format!("required field {} is missing", field),
                }),
                Some(_) => {}
            }
        }

        for (field, value) in object {
            if let Some(text) = value.as_str() {
                if text.len() > self.max_text_len {
                    issues.push(ValidationIssue {
                        field: field.clone(),
                        kind: IssueKind::TextTooLong,
                        message: format!(
                            "field {} exceeds {} bytes",
                            field, self.max_text_len
                        ),
                    });
                }
            }
        }

        issues
    }
}

/// A single validation finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub kind: IssueKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    MissingField,
    NotAnObject,
    TextTooLong,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════════════

/// Registry of accepted payload schemas, keyed by name and version.
pub struct SchemaRegistry {
    schemas: DashMap<(String, u32), PayloadSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self {
            schemas: DashMap::new(),
        }
    }

    /// Registry preloaded with the built-in clinical schemas plus the
    /// internal administrative-action schema.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(PayloadSchema::new("diary_entry", 1, ["entry_date", "text"]));
        registry.register(PayloadSchema::new("observation", 1, ["code", "value"]));
        registry.register(PayloadSchema::new("admin_action", 1, ["action"]));
        registry
    }

    pub fn register(&self, schema: PayloadSchema) {
        self.schemas
            .insert((schema.name.clone(), schema.version), schema);
    }

    pub fn get(&self, name: &str, version: u32) -> Option<PayloadSchema> {
        self.schemas
            .get(&(name.to_string(), version))
            .map(|s| s.clone())
    }

    /// Validate a draft before it is authorized or appended.
    pub fn validate_draft(&self, draft: &EventDraft) -> Result<()> {
        if draft.scope_id.as_str().trim().is_empty() {
            return Err(CoreError::validation("scope_id must not be empty"));
        }

        if draft.operation.requires_reason()
            && draft.reason.as_deref().map(str::trim).unwrap_or("").is_empty()
        {
            return Err(CoreError::new(
                ErrorCode::ReasonRequired,
                format!("{} events must carry a reason for change", draft.operation),
            ));
        }

        let schema = self
            .get(&draft.payload.schema, draft.payload.schema_version)
            .ok_or_else(|| {
                CoreError::new(
                    ErrorCode::UnknownSchema,
                    format!(
                        "Unknown payload schema {} v{}",
                        draft.payload.schema, draft.payload.schema_version
                    ),
                )
            })?;

        let issues = schema.check(&draft.payload.data);
        if issues.is_empty() {
            return Ok(());
        }

        let code = if issues.iter().all(|i| i.kind == IssueKind::MissingField) {
            ErrorCode::MissingRequiredField
        } else {
            ErrorCode::ValidationFailed
        };
        let summary = issues
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        Err(CoreError::new(code, format!("Payload rejected: {}", summary))
            .with_context("issues", &issues))
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
