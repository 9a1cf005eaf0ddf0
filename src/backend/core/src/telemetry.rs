//! Structured logging setup and PHI redaction.
//!
//! JSON output for production, pretty output for development, with an
//! `EnvFilter` built from the configured level. Free-text fields destined for
//! logs or the audit trail pass through the redactor first so protected
//! health information never reaches log sinks.

use regex::Regex;
use std::sync::OnceLock;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Field names that carry direct identifiers and must never be logged or
/// returned to de-identified readers.
pub const IDENTIFIER_FIELDS: &[&str] = &[
    "name",
    "full_name",
    "first_name",
    "last_name",
    "initials",
    "dob",
    "date_of_birth",
    "birth_date",
    "mrn",
    "medical_record_number",
    "ssn",
    "national_id",
    "email",
    "phone",
    "address",
    "contact",
];

/// Check whether a payload field name carries a direct identifier.
pub fn is_identifier_field(name: &str) -> bool {
    let lowered = name.to_lowercase();
    IDENTIFIER_FIELDS.iter().any(|f| lowered == *f)
}

fn value_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            // US-style SSN
            Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("valid regex"),
            // Email addresses
            Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b")
                .expect("valid regex"),
            // Phone numbers
            Regex::new(r"\b\+?\d{1,3}[-. ]?\(?\d{3}\)?[-. ]?\d{3}[-. ]?\d{4}\b")
                .expect("valid regex"),
        ]
    })
}

/// Redact identifier-shaped values embedded in free text.
pub fn redact_free_text(text: &str) -> String {
    let mut out = text.to_string();
    for pattern in value_patterns() {
        out = pattern.replace_all(&out, "[REDACTED]").into_owned();
    }
    out
}

/// Initialize the global tracing subscriber from configuration.
///
/// Returns an error if a subscriber is already installed.
pub fn init_logging(config: &ObservabilityConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    if config.json_logging {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()?;
    }

    Ok(())
}
