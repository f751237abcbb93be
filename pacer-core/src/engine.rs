//! The pacing engine: the single entry point a host binds against.
//!
//! Wires the MX normalizer, per-provider state store, per-message
//! scratch table, resolved configuration, and the optional snapshot
//! store and metrics registry into the four callbacks an outbound
//! delivery path calls (`on_send`, `on_delivered`, `on_deferred`,
//! `on_bounce`) plus the administrative surface from §4.8.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use pacer_common::{internal, outcome, pacing, ProviderKey, Signal};
use pacer_metrics::MetricsRegistry;
use tokio::sync::{broadcast, Notify};

use crate::classifier::{classify, DeferralClass};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::mx::MxNormalizer;
use crate::outcome::{self as transitions, CircuitEvent};
use crate::scheduler::{self, Verdict};
use crate::scratch::{MessageId, ScratchStore};
use crate::snapshot::Snapshot;
use crate::state::{ProviderState, ProviderStateStore};

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Point-in-time stats for one provider, for the admin surface.
#[derive(Debug, Clone)]
pub struct ProviderStats {
    pub provider: ProviderKey,
    pub delay_ms: i64,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub consecutive_rate_limit_failures: u32,
    pub total_delivered: u64,
    pub total_deferred: u64,
    pub total_bounced: u64,
    pub total_rate_limited: u64,
    pub total_circuit_trips: u64,
    pub circuit_open: bool,
    pub circuit_open_until: i64,
    /// Whether this provider is under its soft rate-limit pause
    /// (`no_send_until > now`), distinct from the circuit being open.
    pub paused: bool,
    pub last_error: String,
}

impl ProviderStats {
    fn from_state(provider: ProviderKey, state: &ProviderState, now_ms: i64) -> Self {
        Self {
            provider,
            delay_ms: state.delay_ms,
            consecutive_successes: state.consecutive_successes,
            consecutive_failures: state.consecutive_failures,
            consecutive_rate_limit_failures: state.consecutive_rate_limit_failures,
            total_delivered: state.total_delivered,
            total_deferred: state.total_deferred,
            total_bounced: state.total_bounced,
            total_rate_limited: state.total_rate_limited,
            total_circuit_trips: state.total_circuit_trips,
            circuit_open: state.circuit_is_open(now_ms),
            circuit_open_until: state.circuit_open_until,
            paused: state.no_send_until > now_ms,
            last_error: state.last_error.clone(),
        }
    }
}

/// The single engine instance a host binds its outbound delivery path
/// against. Cheap to clone — every field is internally shared.
#[derive(Clone)]
pub struct PacingEngine {
    config: Arc<EngineConfig>,
    normalizer: Arc<MxNormalizer>,
    states: Arc<ProviderStateStore>,
    scratch: Arc<ScratchStore>,
    metrics: Option<Arc<MetricsRegistry>>,
    last_snapshot_at: Arc<AtomicI64>,
    metrics_started: Arc<AtomicBool>,
    metrics_ready: Arc<Notify>,
}

impl PacingEngine {
    /// Build a fresh engine from `config`, optionally wired to a
    /// metrics registry (the host owns the registry's HTTP exposition).
    #[must_use]
    pub fn new(config: EngineConfig, metrics: Option<Arc<MetricsRegistry>>) -> Self {
        Self {
            config: Arc::new(config),
            normalizer: Arc::new(MxNormalizer::new()),
            states: Arc::new(ProviderStateStore::new()),
            scratch: Arc::new(ScratchStore::new()),
            metrics,
            last_snapshot_at: Arc::new(AtomicI64::new(0)),
            metrics_started: Arc::new(AtomicBool::new(false)),
            metrics_ready: Arc::new(Notify::new()),
        }
    }

    /// A signal fired exactly once, the first time [`Self::on_send`] is
    /// entered — per §4.8, the metrics HTTP server binds lazily off this
    /// rather than at engine construction, so it only comes up in the
    /// process that actually owns the counters.
    #[must_use]
    pub fn metrics_ready(&self) -> Arc<Notify> {
        self.metrics_ready.clone()
    }

    fn mark_metrics_active(&self) {
        if !self.metrics_started.swap(true, Ordering::SeqCst) {
            self.metrics_ready.notify_one();
        }
    }

    /// Load engine state from the configured snapshot file, if any. A
    /// missing, stale, or version-mismatched snapshot degrades to an
    /// empty state store rather than failing engine construction.
    pub fn restore_from_snapshot(&self) {
        let Some(path) = self.config.snapshot.state_file.as_ref() else {
            return;
        };

        match Snapshot::load(path, self.config.snapshot.state_max_age_ms, now_ms()) {
            Ok(snapshot) => {
                internal!("restored pacing state from {:?}", path);
                snapshot.restore_into(&self.states, now_ms());
            }
            Err(err) => {
                internal!(level = WARN, "snapshot not restored, starting fresh: {err}");
            }
        }
    }

    fn resolve(&self, pk: &ProviderKey) -> crate::config::EffectiveConfig {
        let aliases = MxNormalizer::aliases_for(pk.as_str());
        self.config.resolve(pk.as_str(), &aliases)
    }

    fn record_metrics(&self, pk: &ProviderKey, state: &ProviderState, now_ms: i64) {
        let Some(metrics) = self.metrics.as_ref() else {
            return;
        };
        let provider = pk.as_str();
        let circuit_open = state.circuit_is_open(now_ms);
        let open_until = if circuit_open { state.circuit_open_until } else { 0 };
        metrics.set_delay_ms(provider, state.delay_ms.max(0) as u64);
        metrics.set_consecutive_failures(provider, state.consecutive_failures);
        metrics.set_consecutive_rate_limit_failures(provider, state.consecutive_rate_limit_failures);
        metrics.set_circuit_breaker_open(provider, circuit_open);
        metrics.set_circuit_breaker_open_until(provider, open_until / 1000);
    }

    /// Pre-send decision for a message headed to `recipient_domain`
    /// (resolved via `mx_hostname` when known). Per §7, a call with no
    /// recipient domain at all passes straight through as `Proceed` —
    /// hosts use this for non-outbound or already-paced paths.
    pub fn on_send(
        &self,
        message_id: MessageId,
        recipient_domain: Option<&str>,
        mx_hostname: Option<&str>,
    ) -> Verdict {
        self.mark_metrics_active();

        if !self.config.main.enabled {
            return Verdict::Proceed;
        }

        let Some(recipient_domain) = recipient_domain else {
            return Verdict::Proceed;
        };

        let pk = self.normalizer.normalize(recipient_domain, mx_hostname);

        if !self
            .config
            .is_provider_enabled(pk.as_str(), recipient_domain, &MxNormalizer::aliases_for(pk.as_str()))
        {
            return Verdict::Proceed;
        }

        let effective = self.resolve(&pk);
        let now = now_ms();
        let state_handle = self.states.get_or_create(&pk, effective.initial_delay);

        let decision = self.scratch.with_scratch(message_id, |scratch| {
            let mut state = state_handle.lock();
            let decision = scheduler::decide(&mut state, scratch, &effective, now);
            self.record_metrics(&pk, &state, now);
            decision
        });

        if let Some(metrics) = self.metrics.as_ref() {
            if decision.record_delay_applied {
                metrics.inc_delays_applied(pk.as_str());
            }
            if decision.record_baseline_throttled {
                metrics.inc_baseline_throttled(pk.as_str());
            }
        }

        pacing!("{pk}: {:?}", decision.verdict);

        decision.verdict
    }

    /// Record a successful delivery and release the message's scratch
    /// entry.
    pub fn on_delivered(&self, message_id: MessageId, recipient_domain: &str, mx_hostname: Option<&str>) {
        let pk = self.normalizer.normalize(recipient_domain, mx_hostname);
        let effective = self.resolve(&pk);
        let now = now_ms();
        let state_handle = self.states.get_or_create(&pk, effective.initial_delay);

        {
            let mut state = state_handle.lock();
            transitions::on_delivered(&mut state, &effective, now);
            self.record_metrics(&pk, &state, now);
        }

        if let Some(metrics) = self.metrics.as_ref() {
            metrics.inc_deliveries(pk.as_str());
        }
        outcome!("{pk}: delivered");
        self.scratch.release(message_id);
    }

    /// Record a deferral and release the message's scratch entry.
    /// Returns `true` if this deferral tripped the circuit breaker, so
    /// the host can force an out-of-band snapshot save per §4.7.
    pub fn on_deferred(
        &self,
        message_id: MessageId,
        recipient_domain: &str,
        mx_hostname: Option<&str>,
        error_message: &str,
    ) -> bool {
        let pk = self.normalizer.normalize(recipient_domain, mx_hostname);
        let effective = self.resolve(&pk);
        let now = now_ms();
        let state_handle = self.states.get_or_create(&pk, effective.initial_delay);

        let circuit_event = {
            let mut state = state_handle.lock();
            let event = transitions::on_deferred(&mut state, &effective, now, error_message);
            self.record_metrics(&pk, &state, now);
            event
        };

        if let Some(metrics) = self.metrics.as_ref() {
            metrics.inc_deferrals(pk.as_str());
            if classify(error_message) == DeferralClass::RateLimit {
                metrics.inc_rate_limited(pk.as_str());
            }
            if circuit_event == Some(CircuitEvent::Tripped) {
                metrics.inc_circuit_breaker_trips(pk.as_str());
            }
        }

        outcome!("{pk}: deferred ({:?})", circuit_event);
        self.scratch.release(message_id);

        if circuit_event == Some(CircuitEvent::Tripped) {
            self.save_state();
        }

        matches!(circuit_event, Some(CircuitEvent::Tripped))
    }

    /// Record a bounce and release the message's scratch entry.
    pub fn on_bounce(&self, message_id: MessageId, recipient_domain: &str, mx_hostname: Option<&str>) {
        let pk = self.normalizer.normalize(recipient_domain, mx_hostname);
        let now = now_ms();
        let state_handle = self.states.get_or_create(&pk, self.resolve(&pk).initial_delay);

        {
            let mut state = state_handle.lock();
            transitions::on_bounce(&mut state, now);
        }

        if let Some(metrics) = self.metrics.as_ref() {
            metrics.inc_bounces(pk.as_str());
        }
        outcome!("{pk}: bounced");
        self.scratch.release(message_id);
    }

    /// Snapshot every tracked provider's stats, for the admin surface.
    #[must_use]
    pub fn get_stats(&self) -> Vec<ProviderStats> {
        let now = now_ms();
        self.states
            .keys()
            .into_iter()
            .map(|pk| {
                let handle = self.states.get_or_create(&pk, self.resolve(&pk).initial_delay);
                let state = handle.lock();
                ProviderStats::from_state(pk, &state, now)
            })
            .collect()
    }

    #[must_use]
    pub fn get_domain_stats(&self, provider: &str) -> Option<ProviderStats> {
        self.get_stats().into_iter().find(|s| s.provider.as_str() == provider)
    }

    /// Providers with at least `min_failures` consecutive rate-limit
    /// failures, sorted worst-first: circuit open, then paused, then by
    /// failure count.
    #[must_use]
    pub fn get_problem_domains(&self, min_failures: u32) -> Vec<ProviderStats> {
        let mut domains: Vec<_> = self
            .get_stats()
            .into_iter()
            .filter(|s| s.consecutive_rate_limit_failures >= min_failures)
            .collect();

        domains.sort_by(|a, b| {
            b.circuit_open
                .cmp(&a.circuit_open)
                .then(b.paused.cmp(&a.paused))
                .then(b.consecutive_rate_limit_failures.cmp(&a.consecutive_rate_limit_failures))
        });

        domains
    }

    /// Providers with an open circuit, sorted by remaining time,
    /// soonest-to-close first.
    #[must_use]
    pub fn get_open_circuits(&self) -> Vec<ProviderStats> {
        let now = now_ms();
        let mut open: Vec<_> = self.get_stats().into_iter().filter(|s| s.circuit_open).collect();
        open.sort_by_key(|s| s.circuit_open_until - now);
        open
    }

    /// Force a provider's circuit closed, per §4.6.
    pub fn close_circuit(&self, provider: &str) {
        let pk = ProviderKey::new(provider);
        let effective = self.resolve(&pk);
        let handle = self.states.get_or_create(&pk, effective.initial_delay);
        handle.lock().force_close_circuit(effective.initial_delay);
    }

    /// Discard all state for one provider.
    pub fn reset_domain(&self, provider: &str) -> bool {
        self.states.reset(&ProviderKey::new(provider))
    }

    /// Discard all tracked state, process-wide.
    pub fn reset_all(&self) {
        self.states.reset_all();
    }

    /// Purge providers untouched for longer than `max_age_ms`. Returns
    /// the number of entries removed.
    pub fn cleanup_stale(&self, max_age_ms: i64) -> usize {
        self.states.cleanup_stale(now_ms(), max_age_ms)
    }

    /// Write the current state to the configured snapshot file, if
    /// snapshotting is enabled.
    pub fn save_state(&self) -> Option<Result<(), EngineError>> {
        let path = self.config.snapshot.state_file.as_ref()?;
        let now = now_ms();
        let snapshot = Snapshot::build(&self.states, self.config.defaults.initial_delay, now);
        self.last_snapshot_at.store(now, Ordering::Relaxed);
        Some(snapshot.save(path).map_err(EngineError::from))
    }

    /// Drive the periodic snapshot-save and stale-cleanup timers until
    /// `shutdown` fires. Mirrors the host's long-running service loop
    /// idiom: a `tokio::select!` over timers and a broadcast signal.
    pub async fn serve(&self, mut shutdown: broadcast::Receiver<Signal>) {
        if !self.config.main.enabled {
            internal!("engine disabled via main.enabled, idling until shutdown");
            let _ = shutdown.recv().await;
            return;
        }

        let save_interval = self.config.snapshot.state_save_interval_ms.max(1_000) as u64;
        let mut save_timer = tokio::time::interval(std::time::Duration::from_millis(save_interval));
        let mut cleanup_timer = tokio::time::interval(std::time::Duration::from_secs(300));

        loop {
            tokio::select! {
                _ = save_timer.tick() => {
                    if let Some(Err(err)) = self.save_state() {
                        internal!(level = WARN, "periodic snapshot save failed: {err}");
                    }
                }
                _ = cleanup_timer.tick() => {
                    let removed = self.cleanup_stale(self.config.snapshot.state_max_age_ms);
                    if removed > 0 {
                        internal!("cleaned up {removed} stale provider entries");
                    }
                }
                signal = shutdown.recv() => {
                    if matches!(signal, Ok(Signal::Shutdown) | Err(_)) {
                        break;
                    }
                }
            }
        }

        if let Some(Err(err)) = self.save_state() {
            internal!(level = WARN, "final snapshot save on shutdown failed: {err}");
        }
    }

    #[must_use]
    pub fn snapshot_path(&self) -> Option<PathBuf> {
        self.config.snapshot.state_file.clone()
    }
}
