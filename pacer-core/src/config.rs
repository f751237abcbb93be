//! Engine configuration: global defaults, per-provider overrides, the
//! enabled-providers set, and the snapshot/metrics knobs, plus the
//! resolver that turns all of that into one [`EffectiveConfig`] per
//! provider key.
//!
//! Mirrors the host crate's existing config idiom throughout: every
//! struct derives `serde::Deserialize` with `#[serde(default = "fn")]`
//! per-field defaults and a matching manual `Default` impl, and the
//! per-provider registry is a `HashMap`-backed `#[serde(transparent)]`
//! newtype, the same shape as the domain-config override registry this
//! codebase already has elsewhere.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use pacer_common::internal;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// `main.enabled` — the engine-wide on/off switch (§6). The metrics
/// HTTP port is owned solely by `pacer_metrics::MetricsConfig.port`, not
/// duplicated here.
#[derive(Debug, Clone, Serialize)]
pub struct MainConfig {
    pub enabled: bool,
}

const fn default_main_enabled() -> bool {
    true
}

impl Default for MainConfig {
    fn default() -> Self {
        Self {
            enabled: default_main_enabled(),
        }
    }
}

impl<'de> Deserialize<'de> for MainConfig {
    /// Coerces each field individually against a generic RON value map
    /// instead of deriving straight off the struct shape, so a single
    /// malformed field falls back to its default per §4.2/§7 rather
    /// than failing the whole document.
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw: HashMap<String, ron::Value> = HashMap::deserialize(deserializer)?;
        let mut config = Self::default();

        if let Some(v) = raw.get("enabled").and_then(|v| coerce_bool("main.enabled", v)) {
            config.enabled = v;
        }

        Ok(config)
    }
}

/// Coerce a RON value expected to be a whole number, logging and
/// falling back to the caller's default on a type mismatch per §4.2/§7.
fn coerce_i64(field: &str, raw: &ron::Value) -> Option<i64> {
    if let ron::Value::Number(ron::Number::Integer(n)) = raw {
        Some(*n)
    } else {
        log_malformed_number(field, raw);
        None
    }
}

/// As [`coerce_i64`], but also accepts a RON float (truncated), since a
/// human-authored config may write either for a millisecond field.
fn coerce_f64(field: &str, raw: &ron::Value) -> Option<f64> {
    match raw {
        ron::Value::Number(ron::Number::Float(f)) => Some(f.get()),
        ron::Value::Number(ron::Number::Integer(n)) => Some(*n as f64),
        other => {
            log_malformed_number(field, other);
            None
        }
    }
}

fn coerce_u32(field: &str, raw: &ron::Value) -> Option<u32> {
    match raw {
        ron::Value::Number(ron::Number::Integer(n)) => match u32::try_from(*n) {
            Ok(v) => Some(v),
            Err(_) => {
                log_malformed_number(field, raw);
                None
            }
        },
        other => {
            log_malformed_number(field, other);
            None
        }
    }
}

fn coerce_bool(field: &str, raw: &ron::Value) -> Option<bool> {
    if let ron::Value::Bool(b) = raw {
        Some(*b)
    } else {
        let err = ConfigError::MalformedBool {
            field: field.to_string(),
            value: format!("{raw:?}"),
        };
        internal!(level = WARN, "{err}");
        None
    }
}

fn log_malformed_number(field: &str, raw: &ron::Value) {
    let err = ConfigError::MalformedNumber {
        field: field.to_string(),
        value: format!("{raw:?}"),
    };
    internal!(level = WARN, "{err}");
}

/// Global defaults applied to every provider that has no closer-matching
/// override.
#[derive(Debug, Clone, Serialize)]
pub struct GlobalDefaults {
    pub min_delay: i64,
    pub max_delay: i64,
    pub initial_delay: i64,
    pub backoff_multiplier: f64,
    pub recovery_rate: f64,
    pub success_threshold: u32,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_duration: i64,
}

const fn default_min_delay() -> i64 {
    1_000
}

const fn default_max_delay() -> i64 {
    300_000
}

const fn default_initial_delay() -> i64 {
    5_000
}

const fn default_backoff_multiplier() -> f64 {
    1.5
}

const fn default_recovery_rate() -> f64 {
    0.5
}

const fn default_success_threshold() -> u32 {
    5
}

const fn default_circuit_breaker_threshold() -> u32 {
    5
}

const fn default_circuit_breaker_duration() -> i64 {
    300_000
}

impl Default for GlobalDefaults {
    fn default() -> Self {
        Self {
            min_delay: default_min_delay(),
            max_delay: default_max_delay(),
            initial_delay: default_initial_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            recovery_rate: default_recovery_rate(),
            success_threshold: default_success_threshold(),
            circuit_breaker_threshold: default_circuit_breaker_threshold(),
            circuit_breaker_duration: default_circuit_breaker_duration(),
        }
    }
}

impl<'de> Deserialize<'de> for GlobalDefaults {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw: HashMap<String, ron::Value> = HashMap::deserialize(deserializer)?;
        let mut config = Self::default();

        if let Some(v) = raw.get("min_delay").and_then(|v| coerce_i64("min_delay", v)) {
            config.min_delay = v;
        }
        if let Some(v) = raw.get("max_delay").and_then(|v| coerce_i64("max_delay", v)) {
            config.max_delay = v;
        }
        if let Some(v) = raw.get("initial_delay").and_then(|v| coerce_i64("initial_delay", v)) {
            config.initial_delay = v;
        }
        if let Some(v) = raw
            .get("backoff_multiplier")
            .and_then(|v| coerce_f64("backoff_multiplier", v))
        {
            config.backoff_multiplier = v;
        }
        if let Some(v) = raw.get("recovery_rate").and_then(|v| coerce_f64("recovery_rate", v)) {
            config.recovery_rate = v;
        }
        if let Some(v) = raw
            .get("success_threshold")
            .and_then(|v| coerce_u32("success_threshold", v))
        {
            config.success_threshold = v;
        }
        if let Some(v) = raw
            .get("circuit_breaker_threshold")
            .and_then(|v| coerce_u32("circuit_breaker_threshold", v))
        {
            config.circuit_breaker_threshold = v;
        }
        if let Some(v) = raw
            .get("circuit_breaker_duration")
            .and_then(|v| coerce_i64("circuit_breaker_duration", v))
        {
            config.circuit_breaker_duration = v;
        }

        Ok(config)
    }
}

/// A fully resolved configuration for one provider key — always
/// present, always internally consistent (`min_delay ≤ initial_delay ≤
/// max_delay`).
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveConfig {
    pub min_delay: i64,
    pub max_delay: i64,
    pub initial_delay: i64,
    pub backoff_multiplier: f64,
    pub recovery_rate: f64,
    pub success_threshold: u32,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_duration: i64,
}

impl From<&GlobalDefaults> for EffectiveConfig {
    fn from(defaults: &GlobalDefaults) -> Self {
        Self {
            min_delay: defaults.min_delay,
            max_delay: defaults.max_delay,
            initial_delay: defaults.initial_delay,
            backoff_multiplier: defaults.backoff_multiplier,
            recovery_rate: defaults.recovery_rate,
            success_threshold: defaults.success_threshold,
            circuit_breaker_threshold: defaults.circuit_breaker_threshold,
            circuit_breaker_duration: defaults.circuit_breaker_duration,
        }
    }
}

impl EffectiveConfig {
    /// Overlay every field `over` sets explicitly. Unset fields keep
    /// whatever this value already held — callers build `self` fresh
    /// from [`GlobalDefaults`] first, so "inherit from defaults, never
    /// from an intermediate tier" falls out for free.
    fn apply(&mut self, over: &ProviderOverride) {
        if let Some(v) = over.min_delay {
            self.min_delay = v;
        }
        if let Some(v) = over.max_delay {
            self.max_delay = v;
        }
        if let Some(v) = over.initial_delay {
            self.initial_delay = v;
        }
        if let Some(v) = over.backoff_multiplier {
            self.backoff_multiplier = v;
        }
        if let Some(v) = over.recovery_rate {
            self.recovery_rate = v;
        }
        if let Some(v) = over.success_threshold {
            self.success_threshold = v;
        }
        if let Some(v) = over.circuit_breaker_threshold {
            self.circuit_breaker_threshold = v;
        }
        if let Some(v) = over.circuit_breaker_duration {
            self.circuit_breaker_duration = v;
        }
    }
}

/// A partial per-provider override; fields left `None` inherit from
/// [`GlobalDefaults`] directly, never from another override tier.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProviderOverride {
    pub min_delay: Option<i64>,
    pub max_delay: Option<i64>,
    pub initial_delay: Option<i64>,
    pub backoff_multiplier: Option<f64>,
    pub recovery_rate: Option<f64>,
    pub success_threshold: Option<u32>,
    pub circuit_breaker_threshold: Option<u32>,
    pub circuit_breaker_duration: Option<i64>,
}

impl<'de> Deserialize<'de> for ProviderOverride {
    /// A malformed field in an override simply leaves that field unset
    /// (inheriting from [`GlobalDefaults`]) rather than failing the
    /// whole override section.
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw: HashMap<String, ron::Value> = HashMap::deserialize(deserializer)?;

        Ok(Self {
            min_delay: raw.get("min_delay").and_then(|v| coerce_i64("min_delay", v)),
            max_delay: raw.get("max_delay").and_then(|v| coerce_i64("max_delay", v)),
            initial_delay: raw.get("initial_delay").and_then(|v| coerce_i64("initial_delay", v)),
            backoff_multiplier: raw
                .get("backoff_multiplier")
                .and_then(|v| coerce_f64("backoff_multiplier", v)),
            recovery_rate: raw.get("recovery_rate").and_then(|v| coerce_f64("recovery_rate", v)),
            success_threshold: raw
                .get("success_threshold")
                .and_then(|v| coerce_u32("success_threshold", v)),
            circuit_breaker_threshold: raw
                .get("circuit_breaker_threshold")
                .and_then(|v| coerce_u32("circuit_breaker_threshold", v)),
            circuit_breaker_duration: raw
                .get("circuit_breaker_duration")
                .and_then(|v| coerce_i64("circuit_breaker_duration", v)),
        })
    }
}

/// Per-provider override sections, keyed by provider key or recipient
/// alias. `*`/`__all__` is the wildcard tier.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(transparent)]
pub struct OverrideRegistry(HashMap<String, ProviderOverride>);

impl OverrideRegistry {
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ProviderOverride> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: ProviderOverride) {
        self.0.insert(key.into(), value);
    }
}

/// The enabled-providers section: one boolean per provider key or
/// recipient alias, plus an optional wildcard.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(transparent)]
pub struct EnabledProviders(HashMap<String, bool>);

impl EnabledProviders {
    pub fn insert(&mut self, key: impl Into<String>, enabled: bool) {
        self.0.insert(key.into(), enabled);
    }

    /// Whether adaptive rate pacing applies to `pk`. Checked in order:
    /// exact provider key, any known recipient alias, any suffix of
    /// `recipient_domain`, then the wildcard.
    #[must_use]
    pub fn is_enabled(&self, pk: &str, recipient_domain: &str, aliases: &[&str]) -> bool {
        if let Some(v) = self.0.get(pk) {
            return *v;
        }

        for alias in aliases {
            if let Some(v) = self.0.get(*alias) {
                return *v;
            }
        }

        for (key, enabled) in &self.0 {
            if key == "*" || key == "__all__" {
                continue;
            }
            if recipient_domain == key || recipient_domain.ends_with(&format!(".{key}")) {
                return *enabled;
            }
        }

        self.0
            .get("*")
            .or_else(|| self.0.get("__all__"))
            .copied()
            .unwrap_or(false)
    }
}

/// `state_file` / `state_save_interval` / `state_max_age`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SnapshotConfig {
    /// Empty/absent disables the snapshot store entirely.
    #[serde(default)]
    pub state_file: Option<PathBuf>,
    #[serde(default = "default_state_save_interval")]
    pub state_save_interval_ms: i64,
    #[serde(default = "default_state_max_age")]
    pub state_max_age_ms: i64,
}

const fn default_state_save_interval() -> i64 {
    30_000
}

const fn default_state_max_age() -> i64 {
    3_600_000
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            state_file: None,
            state_save_interval_ms: default_state_save_interval(),
            state_max_age_ms: default_state_max_age(),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub main: MainConfig,
    #[serde(default)]
    pub defaults: GlobalDefaults,
    #[serde(default)]
    pub overrides: OverrideRegistry,
    #[serde(default)]
    pub enabled_providers: EnabledProviders,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
}

impl EngineConfig {
    /// Load engine configuration from a RON document at `path`.
    ///
    /// Individual malformed numeric/boolean fields fall back to their
    /// defaults per §4.2/§7 rather than failing this call — the error
    /// returned here is only for an unreadable file or a document that
    /// fails to parse as RON at the structural level (missing/extra
    /// parens, unterminated strings, etc.), not a single bad field.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if `path` can't be read, or
    /// [`ConfigError::Parse`] if the contents aren't valid RON.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        ron::de::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Resolve the effective configuration for `pk`. `aliases` are the
    /// known recipient aliases for this provider (from the MX
    /// normalizer's known-provider table), consulted before the
    /// wildcard tier.
    #[must_use]
    pub fn resolve(&self, pk: &str, aliases: &[&str]) -> EffectiveConfig {
        let mut effective = EffectiveConfig::from(&self.defaults);

        if let Some(over) = self.overrides.get(pk) {
            effective.apply(over);
            return effective;
        }

        for alias in aliases {
            if let Some(over) = self.overrides.get(alias) {
                effective.apply(over);
                return effective;
            }
        }

        if let Some(over) = self
            .overrides
            .get("*")
            .or_else(|| self.overrides.get("__all__"))
        {
            effective.apply(over);
        }

        effective
    }

    /// Whether pacing applies to `pk` at all, per §4.1's "enabled for
    /// adaptive rate" definition.
    #[must_use]
    pub fn is_provider_enabled(&self, pk: &str, recipient_domain: &str, aliases: &[&str]) -> bool {
        self.enabled_providers.is_enabled(pk, recipient_domain, aliases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_satisfy_delay_ordering_invariant() {
        let defaults = GlobalDefaults::default();
        assert!(defaults.min_delay <= defaults.initial_delay);
        assert!(defaults.initial_delay <= defaults.max_delay);
    }

    #[test]
    fn resolve_falls_back_to_defaults_with_no_overrides() {
        let config = EngineConfig::default();
        let effective = config.resolve("google.com", &[]);
        assert_eq!(effective.min_delay, config.defaults.min_delay);
    }

    #[test]
    fn resolve_prefers_exact_override_over_wildcard() {
        let mut config = EngineConfig::default();
        config.overrides.insert(
            "*",
            ProviderOverride {
                min_delay: Some(2_000),
                ..Default::default()
            },
        );
        config.overrides.insert(
            "google.com",
            ProviderOverride {
                min_delay: Some(500),
                ..Default::default()
            },
        );

        let effective = config.resolve("google.com", &[]);
        assert_eq!(effective.min_delay, 500);
    }

    #[test]
    fn resolve_override_inherits_unset_fields_from_defaults() {
        let mut config = EngineConfig::default();
        config.overrides.insert(
            "google.com",
            ProviderOverride {
                min_delay: Some(500),
                ..Default::default()
            },
        );

        let effective = config.resolve("google.com", &[]);
        assert_eq!(effective.min_delay, 500);
        assert_eq!(effective.max_delay, config.defaults.max_delay);
    }

    #[test]
    fn resolve_uses_alias_override_before_wildcard() {
        let mut config = EngineConfig::default();
        config.overrides.insert(
            "gmail.com",
            ProviderOverride {
                max_delay: Some(100_000),
                ..Default::default()
            },
        );

        let effective = config.resolve("google.com", &["gmail.com"]);
        assert_eq!(effective.max_delay, 100_000);
    }

    #[test]
    fn enabled_providers_wildcard_covers_unlisted_providers() {
        let mut enabled = EnabledProviders::default();
        enabled.insert("*", true);
        assert!(enabled.is_enabled("unlisted.example", "unlisted.example", &[]));
    }

    #[test]
    fn enabled_providers_suffix_match() {
        let mut enabled = EnabledProviders::default();
        enabled.insert("example.com", true);
        assert!(enabled.is_enabled("example.com", "mail.example.com", &[]));
    }

    #[test]
    fn enabled_providers_defaults_to_false_with_no_match() {
        let enabled = EnabledProviders::default();
        assert!(!enabled.is_enabled("google.com", "google.com", &[]));
    }

    #[test]
    fn ron_roundtrip_preserves_overrides() {
        let mut config = EngineConfig::default();
        config.overrides.insert(
            "outlook.com",
            ProviderOverride {
                min_delay: Some(2_500),
                ..Default::default()
            },
        );

        let serialized = ron::to_string(&config).unwrap();
        let restored: EngineConfig = ron::from_str(&serialized).unwrap();

        assert_eq!(
            restored.overrides.get("outlook.com").unwrap().min_delay,
            Some(2_500)
        );
    }

    #[test]
    fn malformed_numeric_field_falls_back_to_default() {
        let doc = "(defaults: (min_delay: \"not a number\"))";
        let config: EngineConfig = ron::from_str(doc).unwrap();
        assert_eq!(config.defaults.min_delay, default_min_delay());
    }

    #[test]
    fn malformed_boolean_field_falls_back_to_default() {
        let doc = "(main: (enabled: \"nope\"))";
        let config: EngineConfig = ron::from_str(doc).unwrap();
        assert!(config.main.enabled);
    }

    #[test]
    fn override_with_malformed_field_leaves_it_unset() {
        let doc = "(overrides: {\"google.com\": (min_delay: \"bogus\", max_delay: 9000)})";
        let config: EngineConfig = ron::from_str(doc).unwrap();
        let over = config.overrides.get("google.com").unwrap();
        assert_eq!(over.min_delay, None);
        assert_eq!(over.max_delay, Some(9_000));
    }

    #[test]
    fn load_reads_and_parses_a_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.ron");
        std::fs::write(&path, "(defaults: (min_delay: 2000))").unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.defaults.min_delay, 2_000);
    }

    #[test]
    fn load_missing_file_returns_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.ron");
        assert!(matches!(EngineConfig::load(&path), Err(ConfigError::Io(_))));
    }
}
