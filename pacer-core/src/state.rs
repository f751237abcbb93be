//! Per-provider pacing state and the process-wide store that owns it.
//!
//! Mirrors the store shape this codebase already uses for per-domain
//! rate-limit buckets and circuit breaker data: a `DashMap` keyed by
//! provider, each entry guarded by its own `parking_lot::Mutex` so the
//! read-modify-write the scheduler and outcome transitions perform is
//! serialized per provider without a process-wide lock.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use pacer_common::ProviderKey;

/// Mutable pacing state for a single provider, created lazily on first
/// reference and mutated by scheduler slot-claims and outcome callbacks.
#[derive(Debug, Clone)]
pub struct ProviderState {
    pub delay_ms: i64,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub consecutive_rate_limit_failures: u32,
    pub total_delivered: u64,
    pub total_deferred: u64,
    pub total_bounced: u64,
    pub total_rate_limited: u64,
    pub total_circuit_trips: u64,
    /// Head of the slot queue: earliest moment the next message may be
    /// released. Not persisted across restarts.
    pub next_send_time: i64,
    /// The interval in force when the slot queue head was last
    /// advanced, used to detect recovery-collapse opportunities. Not
    /// persisted across restarts.
    pub pace_delay: i64,
    /// Absolute timestamp the circuit reopens at; 0 means closed.
    pub circuit_open_until: i64,
    /// Absolute timestamp a soft pause (set on every rate-limit event)
    /// lifts at; 0 means no pause in effect.
    pub no_send_until: i64,
    pub last_update: i64,
    pub last_error: String,
}

impl ProviderState {
    #[must_use]
    pub fn new(initial_delay_ms: i64) -> Self {
        Self {
            delay_ms: initial_delay_ms,
            consecutive_successes: 0,
            consecutive_failures: 0,
            consecutive_rate_limit_failures: 0,
            total_delivered: 0,
            total_deferred: 0,
            total_bounced: 0,
            total_rate_limited: 0,
            total_circuit_trips: 0,
            next_send_time: 0,
            pace_delay: 0,
            circuit_open_until: 0,
            no_send_until: 0,
            last_update: 0,
            last_error: String::new(),
        }
    }

    #[must_use]
    pub fn circuit_is_open(&self, now_ms: i64) -> bool {
        self.circuit_open_until > now_ms
    }

    /// Force the circuit closed, reset the rate-limit streak, and reset
    /// the pacing interval to `initial_delay_ms` — the administrative
    /// `close_circuit` operation from §4.6.
    pub fn force_close_circuit(&mut self, initial_delay_ms: i64) {
        self.circuit_open_until = 0;
        self.no_send_until = 0;
        self.consecutive_rate_limit_failures = 0;
        self.delay_ms = initial_delay_ms;
    }
}

/// Process-wide map from provider key to guarded pacing state.
pub struct ProviderStateStore {
    states: DashMap<ProviderKey, Arc<Mutex<ProviderState>>>,
}

impl ProviderStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            states: DashMap::new(),
        }
    }

    /// Get the state for `pk`, creating it with `initial_delay_ms` if
    /// this is the first reference.
    pub fn get_or_create(&self, pk: &ProviderKey, initial_delay_ms: i64) -> Arc<Mutex<ProviderState>> {
        self.states
            .entry(pk.clone())
            .or_insert_with(|| Arc::new(Mutex::new(ProviderState::new(initial_delay_ms))))
            .clone()
    }

    /// Remove a provider's state entirely. The next scheduler call for
    /// that provider recreates it from defaults.
    pub fn reset(&self, pk: &ProviderKey) -> bool {
        self.states.remove(pk).is_some()
    }

    pub fn reset_all(&self) {
        self.states.clear();
    }

    #[must_use]
    pub fn keys(&self) -> Vec<ProviderKey> {
        self.states.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Restore a provider's state from a loaded snapshot entry.
    pub fn restore(&self, pk: ProviderKey, state: ProviderState) {
        self.states.insert(pk, Arc::new(Mutex::new(state)));
    }

    /// Purge entries untouched for longer than `max_age_ms`. Returns the
    /// number of entries removed.
    pub fn cleanup_stale(&self, now_ms: i64, max_age_ms: i64) -> usize {
        let stale: Vec<ProviderKey> = self
            .states
            .iter()
            .filter(|entry| now_ms - entry.value().lock().last_update > max_age_ms)
            .map(|entry| entry.key().clone())
            .collect();

        for key in &stale {
            self.states.remove(key);
        }

        stale.len()
    }
}

impl Default for ProviderStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_seeds_initial_delay() {
        let store = ProviderStateStore::new();
        let pk = ProviderKey::new("google.com");
        let state = store.get_or_create(&pk, 5000);
        assert_eq!(state.lock().delay_ms, 5000);
    }

    #[test]
    fn get_or_create_returns_same_state_on_second_call() {
        let store = ProviderStateStore::new();
        let pk = ProviderKey::new("google.com");
        let first = store.get_or_create(&pk, 5000);
        first.lock().delay_ms = 9000;
        let second = store.get_or_create(&pk, 5000);
        assert_eq!(second.lock().delay_ms, 9000);
    }

    #[test]
    fn reset_removes_state_so_it_is_recreated_fresh() {
        let store = ProviderStateStore::new();
        let pk = ProviderKey::new("google.com");
        store.get_or_create(&pk, 5000).lock().delay_ms = 9000;
        assert!(store.reset(&pk));
        let recreated = store.get_or_create(&pk, 5000);
        assert_eq!(recreated.lock().delay_ms, 5000);
    }

    #[test]
    fn cleanup_stale_removes_only_entries_past_max_age() {
        let store = ProviderStateStore::new();
        let fresh = ProviderKey::new("fresh.com");
        let stale = ProviderKey::new("stale.com");
        store.get_or_create(&fresh, 5000).lock().last_update = 1_000;
        store.get_or_create(&stale, 5000).lock().last_update = 0;

        let removed = store.cleanup_stale(10_000, 5_000);

        assert_eq!(removed, 1);
        assert_eq!(store.keys(), vec![fresh]);
    }

    #[test]
    fn force_close_circuit_resets_pacing_and_circuit_fields() {
        let mut state = ProviderState::new(5000);
        state.delay_ms = 40_000;
        state.circuit_open_until = 999_999;
        state.no_send_until = 999_999;
        state.consecutive_rate_limit_failures = 7;

        state.force_close_circuit(5000);

        assert_eq!(state.delay_ms, 5000);
        assert_eq!(state.circuit_open_until, 0);
        assert_eq!(state.no_send_until, 0);
        assert_eq!(state.consecutive_rate_limit_failures, 0);
    }
}
