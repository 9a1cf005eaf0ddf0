//! Error handling for Veritas Core.
//!
//! This module provides:
//! - A crate-wide error type with machine-readable codes
//! - Severity levels driving log output
//! - Structured details (entity, context) for callers and audit trails
//! - An `ErrorContext` extension trait for `Result`/`Option`
//!
//! The taxonomy follows the core's contract: validation failures and
//! unauthorized requests are rejected outright, causal conflicts are stored
//! and surfaced for resolution, and integrity violations are fatal for the
//! affected aggregate and never auto-repaired.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{debug, error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// These codes are stable and can be used by callers for programmatic error
/// handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Ledger Errors (1000-1099)
    AggregateNotFound,
    EventNotFound,
    ChainPreconditionFailed,
    AggregateHalted,
    IntegrityViolation,

    // Conflict Errors (1100-1199)
    CausalConflict,
    ConflictNotFound,
    ConflictAlreadyResolved,
    InvalidResolution,

    // Annotation Errors (1200-1299)
    AnnotationNotFound,

    // Access Errors (4000-4099)
    Unauthorized,
    NoActiveContext,
    ScopeNotGranted,
    GrantNotFound,
    GrantExpired,
    GrantRevoked,

    // Validation Errors (4100-4199)
    ValidationFailed,
    UnknownSchema,
    MissingRequiredField,
    ReasonRequired,

    // Serialization Errors (2200-2299)
    Serialization,

    // Configuration Errors (5000-5099)
    InvalidConfiguration,

    // Internal Errors (9000-9099)
    Internal,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::AggregateNotFound => 1000,
            Self::EventNotFound => 1001,
            Self::ChainPreconditionFailed => 1002,
            Self::AggregateHalted => 1003,
            Self::IntegrityViolation => 1004,

            Self::CausalConflict => 1100,
            Self::ConflictNotFound => 1101,
            Self::ConflictAlreadyResolved => 1102,
            Self::InvalidResolution => 1103,

            Self::AnnotationNotFound => 1200,

            Self::Unauthorized => 4000,
            Self::NoActiveContext => 4001,
            Self::ScopeNotGranted => 4002,
            Self::GrantNotFound => 4003,
            Self::GrantExpired => 4004,
            Self::GrantRevoked => 4005,

            Self::ValidationFailed => 4100,
            Self::UnknownSchema => 4101,
            Self::MissingRequiredField => 4102,
            Self::ReasonRequired => 4103,

            Self::Serialization => 2200,

            Self::InvalidConfiguration => 5000,

            Self::Internal => 9000,
        }
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "ledger",
            1100..=1199 => "conflict",
            1200..=1299 => "annotation",
            2200..=2299 => "serialization",
            4000..=4099 => "access",
            4100..=4199 => "validation",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }

    /// Whether this code marks a compliance-critical condition that halts the
    /// affected aggregate.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::IntegrityViolation | Self::AggregateHalted)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging and escalation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Caller errors (bad input, unknown ids)
    Low,
    /// Expected operational outcomes (causal conflicts, expired grants)
    Medium,
    /// Access violations and system errors (always logged)
    High,
    /// Compliance-critical conditions requiring investigation
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::AggregateNotFound
            | ErrorCode::EventNotFound
            | ErrorCode::ConflictNotFound
            | ErrorCode::AnnotationNotFound
            | ErrorCode::GrantNotFound
            | ErrorCode::ValidationFailed
            | ErrorCode::UnknownSchema
            | ErrorCode::MissingRequiredField
            | ErrorCode::ReasonRequired => Self::Low,

            ErrorCode::CausalConflict
            | ErrorCode::ConflictAlreadyResolved
            | ErrorCode::InvalidResolution
            | ErrorCode::ChainPreconditionFailed
            | ErrorCode::GrantExpired
            | ErrorCode::GrantRevoked => Self::Medium,

            ErrorCode::Unauthorized
            | ErrorCode::NoActiveContext
            | ErrorCode::ScopeNotGranted
            | ErrorCode::Serialization
            | ErrorCode::InvalidConfiguration
            | ErrorCode::Internal => Self::High,

            ErrorCode::IntegrityViolation | ErrorCode::AggregateHalted => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Related entity ID (aggregate, event, conflict, grant)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Related entity type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(
        mut self,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Veritas Core.
#[derive(Error, Debug)]
pub struct CoreError {
    /// Machine-readable error code
    code: ErrorCode,

    /// Caller-facing error message
    message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl CoreError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and message.
    pub fn new(code: ErrorCode, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        }
    }

    /// Create an error with both caller-facing and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::Internal, "An internal error occurred", message)
    }

    /// Create a not found error.
    pub fn not_found(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        let entity_type = entity_type.into();
        let entity_id = entity_id.into();
        let code = match entity_type.as_str() {
            "event" => ErrorCode::EventNotFound,
            "conflict" => ErrorCode::ConflictNotFound,
            "annotation" => ErrorCode::AnnotationNotFound,
            "grant" => ErrorCode::GrantNotFound,
            _ => ErrorCode::AggregateNotFound,
        };
        Self::new(code, format!("{} not found: {}", entity_type, entity_id))
            .with_details(ErrorDetails::new().with_entity(&entity_type, &entity_id))
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }

    /// Create an unauthorized error.
    pub fn unauthorized(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    /// Create an integrity violation error for a tampered stream.
    ///
    /// Compliance-critical: the affected aggregate halts and the condition is
    /// escalated, never auto-repaired.
    pub fn integrity_violation(aggregate_id: impl Into<String>, position: u64) -> Self {
        let aggregate_id = aggregate_id.into();
        Self::new(
            ErrorCode::IntegrityViolation,
            format!(
                "Hash chain mismatch for aggregate {} at position {}",
                aggregate_id, position
            ),
        )
        .with_details(
            ErrorDetails::new()
                .with_entity("aggregate", &aggregate_id)
                .with_context("position", position),
        )
    }

    /// Create an error for appends against a halted aggregate.
    pub fn aggregate_halted(aggregate_id: impl Into<String>) -> Self {
        let aggregate_id = aggregate_id.into();
        Self::new(
            ErrorCode::AggregateHalted,
            format!(
                "Aggregate {} is halted pending integrity investigation",
                aggregate_id
            ),
        )
        .with_details(ErrorDetails::new().with_entity("aggregate", &aggregate_id))
    }

    /// Create a hash-chain precondition error.
    pub fn chain_precondition(declared: impl Into<String>, head: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ChainPreconditionFailed,
            "Declared prior chain hash does not match the stream head",
        )
        .with_context("declared", declared.into())
        .with_context("head", head.into())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the caller-facing message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the internal message (if any).
    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    /// Get the error details.
    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    internal_message = ?self.internal_message,
                    details = ?self.details,
                    "COMPLIANCE-CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    internal_message = ?self.internal_message,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                debug!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    "Low severity error"
                );
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Context Extension Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Wrap an error as an internal error with a message.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Wrap an error under a specific error code.
    fn with_error_code(self, code: ErrorCode) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| CoreError::internal(message.into()).with_source(e))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.map_err(|e| CoreError::new(code, e.to_string()).with_source(e))
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| CoreError::new(ErrorCode::AggregateNotFound, message.into()))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.ok_or_else(|| CoreError::new(code, "Resource not found"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<serde_json::Error> for CoreError {
    fn from(error: serde_json::Error) -> Self {
        Self::with_internal(
            ErrorCode::Serialization,
            "Failed to process JSON data",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<config::ConfigError> for CoreError {
    fn from(error: config::ConfigError) -> Self {
        Self::with_internal(
            ErrorCode::InvalidConfiguration,
            "Configuration is invalid",
            error.to_string(),
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
