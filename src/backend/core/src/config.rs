//! Configuration management.

use serde::Deserialize;
use std::time::Duration;

/// Main core configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CoreConfig {
    /// Access control configuration
    #[serde(default)]
    pub access: AccessConfig,

    /// Event store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Audit trail configuration
    #[serde(default)]
    pub audit: AuditConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessConfig {
    /// Whether write-capability checks are enforced.
    ///
    /// Fixed at engine construction; there is deliberately no way to flip
    /// this at runtime. Read filtering is enforced regardless.
    #[serde(default = "default_enforce_write_protection")]
    pub enforce_write_protection: bool,

    /// Hard ceiling for break-glass grant lifetimes. Grant requests with a
    /// longer TTL are rejected.
    #[serde(default = "default_break_glass_max_ttl", with = "humantime_serde")]
    pub break_glass_max_ttl: Duration,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            enforce_write_protection: default_enforce_write_protection(),
            break_glass_max_ttl: default_break_glass_max_ttl(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Number of events verified per integrity-check step. Verification is
    /// resumable from the returned checkpoint after each step.
    #[serde(default = "default_verify_chunk_size")]
    pub verify_chunk_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            verify_chunk_size: default_verify_chunk_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// Maximum retained in-memory audit entries (oldest evicted first).
    #[serde(default = "default_audit_capacity")]
    pub capacity: usize,

    /// Whether allowed decisions are recorded too (denials always are).
    #[serde(default = "default_record_allowed")]
    pub record_allowed: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            capacity: default_audit_capacity(),
            record_allowed: default_record_allowed(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
        }
    }
}

// Default value functions
fn default_enforce_write_protection() -> bool {
    true
}
fn default_break_glass_max_ttl() -> Duration {
    Duration::from_secs(4 * 60 * 60)
}
fn default_verify_chunk_size() -> usize {
    1024
}
fn default_audit_capacity() -> usize {
    65536
}
fn default_record_allowed() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_json_logging() -> bool {
    true
}

impl CoreConfig {
    /// Load configuration from the environment.
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("VERITAS").separator("__"))
            .build()?;

        let cfg: CoreConfig = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("VERITAS").separator("__"))
            .build()?;

        let cfg: CoreConfig = config.try_deserialize()?;
        Ok(cfg)
    }
}
