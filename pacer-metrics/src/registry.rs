//! Prometheus-backed metrics registry
//!
//! One gauge/counter vector per series named in the metrics surface,
//! each labeled by `provider`. Counters never reset for the life of the
//! process; gauges are overwritten on every state transition so a scrape
//! always reflects the current snapshot, not a delta.

use prometheus::{Encoder, GaugeVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use serde_json::{Map, Value};

use crate::MetricsError;

const LABEL: &str = "provider";

/// The process-wide metrics registry
///
/// Thread-safe by construction: every instrument here is internally
/// atomic, so `&MetricsRegistry` can be shared behind an `Arc` and
/// written to concurrently from every provider's pacing path.
pub struct MetricsRegistry {
    registry: Registry,
    delay_ms: GaugeVec,
    consecutive_failures: IntGaugeVec,
    consecutive_rate_limit_failures: IntGaugeVec,
    circuit_breaker_open: IntGaugeVec,
    circuit_breaker_open_until: IntGaugeVec,
    deliveries_total: IntCounterVec,
    deferrals_total: IntCounterVec,
    bounces_total: IntCounterVec,
    delays_applied_total: IntCounterVec,
    baseline_throttled_total: IntCounterVec,
    rate_limited_total: IntCounterVec,
    circuit_breaker_trips_total: IntCounterVec,
}

impl MetricsRegistry {
    /// Build a fresh registry and register every instrument
    ///
    /// # Errors
    ///
    /// Returns an error if a metric name collides during registration.
    /// This can only happen from a programming error (the same name
    /// registered twice) and is therefore not expected in practice.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let delay_ms = GaugeVec::new(
            Opts::new("delay_ms", "current pacing delay applied to this provider"),
            &[LABEL],
        )?;
        let consecutive_failures = IntGaugeVec::new(
            Opts::new(
                "consecutive_failures",
                "consecutive delivery failures for this provider",
            ),
            &[LABEL],
        )?;
        let consecutive_rate_limit_failures = IntGaugeVec::new(
            Opts::new(
                "consecutive_rate_limit_failures",
                "consecutive rate-limit responses for this provider",
            ),
            &[LABEL],
        )?;
        let circuit_breaker_open = IntGaugeVec::new(
            Opts::new(
                "circuit_breaker_open",
                "1 if the circuit is currently open for this provider, else 0",
            ),
            &[LABEL],
        )?;
        let circuit_breaker_open_until = IntGaugeVec::new(
            Opts::new(
                "circuit_breaker_open_until",
                "unix seconds the circuit reopens at, 0 if closed",
            ),
            &[LABEL],
        )?;
        let deliveries_total = IntCounterVec::new(
            Opts::new("deliveries_total", "successful deliveries"),
            &[LABEL],
        )?;
        let deferrals_total = IntCounterVec::new(
            Opts::new("deferrals_total", "deferred (temporary failure) outcomes"),
            &[LABEL],
        )?;
        let bounces_total = IntCounterVec::new(
            Opts::new("bounces_total", "permanent failure outcomes"),
            &[LABEL],
        )?;
        let delays_applied_total = IntCounterVec::new(
            Opts::new(
                "delays_applied_total",
                "scheduler decisions that applied a nonzero wait",
            ),
            &[LABEL],
        )?;
        let baseline_throttled_total = IntCounterVec::new(
            Opts::new(
                "baseline_throttled_total",
                "waits applied purely by baseline pacing, not backoff",
            ),
            &[LABEL],
        )?;
        let rate_limited_total = IntCounterVec::new(
            Opts::new(
                "rate_limited_total",
                "responses classified as rate-limit signals",
            ),
            &[LABEL],
        )?;
        let circuit_breaker_trips_total = IntCounterVec::new(
            Opts::new("circuit_breaker_trips_total", "times the circuit tripped open"),
            &[LABEL],
        )?;

        registry.register(Box::new(delay_ms.clone()))?;
        registry.register(Box::new(consecutive_failures.clone()))?;
        registry.register(Box::new(consecutive_rate_limit_failures.clone()))?;
        registry.register(Box::new(circuit_breaker_open.clone()))?;
        registry.register(Box::new(circuit_breaker_open_until.clone()))?;
        registry.register(Box::new(deliveries_total.clone()))?;
        registry.register(Box::new(deferrals_total.clone()))?;
        registry.register(Box::new(bounces_total.clone()))?;
        registry.register(Box::new(delays_applied_total.clone()))?;
        registry.register(Box::new(baseline_throttled_total.clone()))?;
        registry.register(Box::new(rate_limited_total.clone()))?;
        registry.register(Box::new(circuit_breaker_trips_total.clone()))?;

        Ok(Self {
            registry,
            delay_ms,
            consecutive_failures,
            consecutive_rate_limit_failures,
            circuit_breaker_open,
            circuit_breaker_open_until,
            deliveries_total,
            deferrals_total,
            bounces_total,
            delays_applied_total,
            baseline_throttled_total,
            rate_limited_total,
            circuit_breaker_trips_total,
        })
    }

    pub fn set_delay_ms(&self, provider: &str, value_ms: u64) {
        self.delay_ms.with_label_values(&[provider]).set(value_ms as f64);
    }

    pub fn set_consecutive_failures(&self, provider: &str, value: u32) {
        self.consecutive_failures
            .with_label_values(&[provider])
            .set(i64::from(value));
    }

    pub fn set_consecutive_rate_limit_failures(&self, provider: &str, value: u32) {
        self.consecutive_rate_limit_failures
            .with_label_values(&[provider])
            .set(i64::from(value));
    }

    pub fn set_circuit_breaker_open(&self, provider: &str, open: bool) {
        self.circuit_breaker_open
            .with_label_values(&[provider])
            .set(i64::from(open));
    }

    pub fn set_circuit_breaker_open_until(&self, provider: &str, unix_seconds: i64) {
        self.circuit_breaker_open_until
            .with_label_values(&[provider])
            .set(unix_seconds);
    }

    pub fn inc_deliveries(&self, provider: &str) {
        self.deliveries_total.with_label_values(&[provider]).inc();
    }

    pub fn inc_deferrals(&self, provider: &str) {
        self.deferrals_total.with_label_values(&[provider]).inc();
    }

    pub fn inc_bounces(&self, provider: &str) {
        self.bounces_total.with_label_values(&[provider]).inc();
    }

    pub fn inc_delays_applied(&self, provider: &str) {
        self.delays_applied_total.with_label_values(&[provider]).inc();
    }

    pub fn inc_baseline_throttled(&self, provider: &str) {
        self.baseline_throttled_total
            .with_label_values(&[provider])
            .inc();
    }

    pub fn inc_rate_limited(&self, provider: &str) {
        self.rate_limited_total.with_label_values(&[provider]).inc();
    }

    pub fn inc_circuit_breaker_trips(&self, provider: &str) {
        self.circuit_breaker_trips_total
            .with_label_values(&[provider])
            .inc();
    }

    /// Render every series in Prometheus text exposition format 0.0.4
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying encoder fails, which only
    /// happens if a metric value is non-UTF8 — never the case here.
    pub fn encode_text(&self) -> Result<String, MetricsError> {
        let families = self.registry.gather();
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        encoder.encode(&families, &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Dump every series as a JSON object keyed by metric name
    #[must_use]
    pub fn stats_json(&self) -> Value {
        let mut out = Map::new();
        for family in self.registry.gather() {
            let mut series = Vec::new();
            for metric in family.get_metric() {
                let mut labels = Map::new();
                for pair in metric.get_label() {
                    labels.insert(
                        pair.get_name().to_string(),
                        Value::String(pair.get_value().to_string()),
                    );
                }
                let value = if metric.has_gauge() {
                    metric.get_gauge().get_value()
                } else if metric.has_counter() {
                    metric.get_counter().get_value()
                } else {
                    0.0
                };
                series.push(serde_json::json!({ "labels": labels, "value": value }));
            }
            out.insert(family.get_name().to_string(), Value::Array(series));
        }
        Value::Object(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_recorded_series_in_text_format() {
        let registry = MetricsRegistry::new().unwrap();
        registry.set_delay_ms("google.com", 1500);
        registry.inc_deliveries("google.com");

        let text = registry.encode_text().unwrap();
        assert!(text.contains("delay_ms"));
        assert!(text.contains("provider=\"google.com\""));
        assert!(text.contains("deliveries_total"));
    }

    #[test]
    fn stats_json_reflects_recorded_series() {
        let registry = MetricsRegistry::new().unwrap();
        registry.inc_bounces("outlook.com");

        let stats = registry.stats_json();
        let bounces = stats.get("bounces_total").unwrap().as_array().unwrap();
        assert_eq!(bounces.len(), 1);
        assert_eq!(bounces[0]["labels"]["provider"], "outlook.com");
        assert_eq!(bounces[0]["value"], 1.0);
    }

    #[test]
    fn circuit_breaker_gauges_round_trip() {
        let registry = MetricsRegistry::new().unwrap();
        registry.set_circuit_breaker_open("yahoo.com", true);
        registry.set_circuit_breaker_open_until("yahoo.com", 1_700_000_000);

        let text = registry.encode_text().unwrap();
        assert!(text.contains("circuit_breaker_open{provider=\"yahoo.com\"} 1"));
        assert!(text.contains("circuit_breaker_open_until{provider=\"yahoo.com\"} 1700000000"));
    }
}
