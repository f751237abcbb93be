//! Post-send outcome transitions: §4.5.
//!
//! These mutate the same [`ProviderState`] the scheduler reads, under
//! the same per-provider lock, so a send's outcome is always applied
//! before the next scheduler decision for that provider observes it.

use crate::classifier::{classify, DeferralClass};
use crate::config::EffectiveConfig;
use crate::state::ProviderState;

const MAX_LAST_ERROR_LEN: usize = 512;

/// A circuit state change triggered by a deferral, surfaced so the
/// engine can decide whether to force an immediate snapshot save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitEvent {
    Tripped,
    Extended,
}

/// Record a successful delivery.
pub fn on_delivered(state: &mut ProviderState, config: &EffectiveConfig, now_ms: i64) {
    state.total_delivered += 1;
    state.consecutive_successes += 1;
    state.consecutive_failures = 0;
    state.last_update = now_ms;

    // A success counts toward the tally even with the circuit open,
    // but recovery and circuit state are untouched until it closes.
    if state.circuit_open_until > now_ms {
        return;
    }

    if state.consecutive_successes >= config.success_threshold {
        let recovered = ((state.delay_ms as f64) * config.recovery_rate).floor() as i64;
        state.delay_ms = recovered.max(config.min_delay);
        state.consecutive_rate_limit_failures = state
            .consecutive_rate_limit_failures
            .saturating_sub(config.success_threshold);
        state.consecutive_successes = 0;
        state.no_send_until = 0;
    }
}

/// Record a deferral. Returns `Some` when the deferral tripped or
/// extended the circuit breaker.
pub fn on_deferred(
    state: &mut ProviderState,
    config: &EffectiveConfig,
    now_ms: i64,
    error_message: &str,
) -> Option<CircuitEvent> {
    state.total_deferred += 1;
    state.consecutive_failures += 1;
    state.last_update = now_ms;
    state.last_error = truncate(error_message);

    if classify(error_message) != DeferralClass::RateLimit {
        return None;
    }

    state.consecutive_successes = 0;
    state.consecutive_rate_limit_failures += 1;
    state.total_rate_limited += 1;

    let backed_off = ((state.delay_ms as f64) * config.backoff_multiplier).floor() as i64;
    state.delay_ms = backed_off.min(config.max_delay);
    state.no_send_until = now_ms + state.delay_ms;

    if state.consecutive_rate_limit_failures < config.circuit_breaker_threshold {
        return None;
    }

    if state.circuit_open_until <= now_ms {
        state.circuit_open_until = now_ms + config.circuit_breaker_duration;
        state.total_circuit_trips += 1;
        Some(CircuitEvent::Tripped)
    } else {
        state.circuit_open_until = state.circuit_open_until.max(now_ms) + config.circuit_breaker_duration;
        Some(CircuitEvent::Extended)
    }
}

/// Record a bounce. Bounces are terminal and recipient-specific; they
/// never touch pacing or circuit state, only the monitoring tally.
pub fn on_bounce(state: &mut ProviderState, now_ms: i64) {
    state.total_bounced += 1;
    state.last_update = now_ms;
}

fn truncate(message: &str) -> String {
    if message.len() <= MAX_LAST_ERROR_LEN {
        return message.to_string();
    }
    let mut end = MAX_LAST_ERROR_LEN;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}
