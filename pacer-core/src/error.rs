//! Typed error hierarchy for the pacing engine
//!
//! Every variant here is a degrade-not-propagate case per the engine's
//! error handling policy: constructing one of these is itself the
//! terminal handling step for most call sites (it gets logged and the
//! caller falls back to a default), not a hard failure bubbled to the
//! host. The type is still fully `std::error::Error` so fallible
//! constructors (snapshot load/save, metrics bind) can be tested
//! precisely by category.

use thiserror::Error;

/// Top-level error for the pacing engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Metrics(#[from] MetricsBindError),
}

impl EngineError {
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    #[must_use]
    pub const fn is_snapshot(&self) -> bool {
        matches!(self, Self::Snapshot(_))
    }
}

/// Malformed or unreadable configuration
///
/// Per §7, a config error always degrades to "fall back to defaults for
/// the affected field", never aborts loading the rest of the config.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("malformed numeric value {value:?} for field {field}, falling back to default")]
    MalformedNumber { field: String, value: String },

    #[error("malformed boolean value {value:?} for field {field}, falling back to default")]
    MalformedBool { field: String, value: String },

    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
}

/// Snapshot persistence failures
///
/// Every variant here is handled by logging and continuing with empty
/// or partial state, per §4.7/§7.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot file not found")]
    NotFound,

    #[error("snapshot schema version {found} does not match expected {expected}")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("snapshot is older than the configured max age ({age_ms}ms > {max_age_ms}ms)")]
    Stale { age_ms: i64, max_age_ms: i64 },

    #[error("failed to read or write snapshot file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to (de)serialize snapshot: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Metrics HTTP server bind failure
#[derive(Debug, Error)]
#[error("failed to bind metrics server to port {port}: {source}")]
pub struct MetricsBindError {
    pub port: u16,
    pub source: std::io::Error,
}
