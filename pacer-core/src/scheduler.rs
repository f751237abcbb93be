//! The pacing scheduler: the pre-send decision from §4.4.
//!
//! `decide` is the one place the atomic slot-claim happens. Callers
//! must hold the provider's state lock for the duration of the call —
//! the read-then-advance of `next_send_time` is only atomic with
//! respect to other messages for the same provider if no other thread
//! can observe or mutate the state in between.

use crate::config::EffectiveConfig;
use crate::scratch::Scratch;
use crate::state::ProviderState;

/// The scheduler's verdict for one pre-send decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Send now.
    Proceed,
    /// Hold the worker for exactly this many milliseconds, then
    /// proceed. Used when the wait fits within the claim horizon.
    Wait(u64),
    /// Release the worker; ask the host to re-invoke the scheduler
    /// after at least this many milliseconds.
    Reenqueue(u64),
}

/// A scheduler decision, plus which metrics it implies recording. Kept
/// separate from [`Verdict`] so this module stays free of any
/// dependency on the metrics registry.
#[derive(Debug, Clone, Copy)]
pub struct Decision {
    pub verdict: Verdict,
    pub record_delay_applied: bool,
    pub record_baseline_throttled: bool,
}

/// Evaluate the pre-send decision for one message against a provider's
/// current state, per §4.4.
pub fn decide(
    state: &mut ProviderState,
    scratch: &mut Scratch,
    config: &EffectiveConfig,
    now_ms: i64,
) -> Decision {
    // Step 1: circuit check.
    if state.circuit_open_until > now_ms {
        let wait = (state.circuit_open_until - now_ms).max(0);
        let record_delay_applied = !scratch.delay_counted;
        scratch.delay_counted = true;
        return Decision {
            verdict: Verdict::Reenqueue(wait as u64),
            record_delay_applied,
            record_baseline_throttled: false,
        };
    }

    // Step 2: circuit-just-expired cleanup. Does not touch delay_ms or
    // consecutive_rate_limit_failures — gradual recovery starts here.
    if state.circuit_open_until > 0 && state.circuit_open_until <= now_ms {
        state.circuit_open_until = 0;
        state.no_send_until = 0;
    }

    // Step 3: soft pause check.
    if state.no_send_until > now_ms {
        let wait = (state.no_send_until - now_ms).max(0);
        let record_delay_applied = !scratch.delay_counted;
        scratch.delay_counted = true;
        return Decision {
            verdict: Verdict::Reenqueue(wait as u64),
            record_delay_applied,
            record_baseline_throttled: false,
        };
    }

    // Step 4: slot-based pacing.
    let d = if state.consecutive_rate_limit_failures > 0 {
        state.delay_ms
    } else {
        config.min_delay
    };

    if state.next_send_time < now_ms {
        state.next_send_time = now_ms;
    }

    if d < state.pace_delay && state.next_send_time > now_ms + d {
        state.next_send_time = now_ms + d;
    }

    state.pace_delay = d;

    if let Some(slot) = scratch.claimed_slot {
        let wait = slot - now_ms;
        if wait <= 0 {
            scratch.claimed_slot = None;
            return Decision {
                verdict: Verdict::Proceed,
                record_delay_applied: false,
                record_baseline_throttled: false,
            };
        }
        return Decision {
            verdict: Verdict::Wait(wait as u64),
            record_delay_applied: false,
            record_baseline_throttled: false,
        };
    }

    let my_slot = state.next_send_time;
    let wait = my_slot - now_ms;
    let claim_horizon = (d.saturating_mul(10)).min(5_000);

    if wait <= 0 {
        state.next_send_time = now_ms + d;
        return Decision {
            verdict: Verdict::Proceed,
            record_delay_applied: false,
            record_baseline_throttled: false,
        };
    }

    if wait <= claim_horizon {
        scratch.claimed_slot = Some(my_slot);
        state.next_send_time = my_slot + d;
        let record_delay_applied = !scratch.delay_counted;
        scratch.delay_counted = true;
        return Decision {
            verdict: Verdict::Wait(wait as u64),
            record_delay_applied,
            record_baseline_throttled: state.consecutive_rate_limit_failures == 0,
        };
    }

    // Else: do not claim a slot; ask the host to try again later. A
    // freed slot or a collapsed head may be visible on re-entry.
    let reenqueue_ms = wait.min(d).min(5_000);
    Decision {
        verdict: Verdict::Reenqueue(reenqueue_ms as u64),
        record_delay_applied: false,
        record_baseline_throttled: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EffectiveConfig {
        EffectiveConfig {
            min_delay: 1_000,
            max_delay: 300_000,
            initial_delay: 5_000,
            backoff_multiplier: 1.5,
            recovery_rate: 0.5,
            success_threshold: 5,
            circuit_breaker_threshold: 5,
            circuit_breaker_duration: 300_000,
        }
    }

    #[test]
    fn scenario_a_baseline_pacing() {
        let mut state = ProviderState::new(5_000);
        let config = config();

        let mut first_scratch = Scratch::default();
        let first = decide(&mut state, &mut first_scratch, &config, 0);
        assert_eq!(first.verdict, Verdict::Proceed);

        let mut second_scratch = Scratch::default();
        let second = decide(&mut state, &mut second_scratch, &config, 0);
        match second.verdict {
            Verdict::Wait(w) => assert!((1..=5_000).contains(&w)),
            other => panic!("expected Wait, got {other:?}"),
        }
        assert!(second.record_baseline_throttled);
    }

    #[test]
    fn circuit_open_returns_reenqueue_with_remaining_time() {
        let mut state = ProviderState::new(5_000);
        state.circuit_open_until = 10_000;
        let mut scratch = Scratch::default();

        let decision = decide(&mut state, &mut scratch, &config(), 4_000);

        assert_eq!(decision.verdict, Verdict::Reenqueue(6_000));
        assert!(decision.record_delay_applied);
    }

    #[test]
    fn circuit_reenqueue_only_records_delay_metric_once_per_message() {
        let mut state = ProviderState::new(5_000);
        state.circuit_open_until = 10_000;
        let mut scratch = Scratch::default();

        let first = decide(&mut state, &mut scratch, &config(), 4_000);
        let second = decide(&mut state, &mut scratch, &config(), 4_500);

        assert!(first.record_delay_applied);
        assert!(!second.record_delay_applied);
    }

    #[test]
    fn expired_circuit_is_cleared_without_touching_delay_ms() {
        let mut state = ProviderState::new(5_000);
        state.circuit_open_until = 1_000;
        state.delay_ms = 40_000;
        state.consecutive_rate_limit_failures = 3;
        let mut scratch = Scratch::default();

        decide(&mut state, &mut scratch, &config(), 2_000);

        assert_eq!(state.circuit_open_until, 0);
        assert_eq!(state.delay_ms, 40_000);
        assert_eq!(state.consecutive_rate_limit_failures, 3);
    }

    #[test]
    fn soft_pause_reenqueues_with_remaining_time() {
        let mut state = ProviderState::new(5_000);
        state.no_send_until = 7_500;
        let mut scratch = Scratch::default();

        let decision = decide(&mut state, &mut scratch, &config(), 0);

        assert_eq!(decision.verdict, Verdict::Reenqueue(7_500));
    }

    #[test]
    fn claimed_slot_elapsed_clears_claim_and_proceeds() {
        let mut state = ProviderState::new(5_000);
        let mut scratch = Scratch {
            claimed_slot: Some(1_000),
            delay_counted: true,
        };

        let decision = decide(&mut state, &mut scratch, &config(), 1_000);

        assert_eq!(decision.verdict, Verdict::Proceed);
        assert_eq!(scratch.claimed_slot, None);
    }

    #[test]
    fn wait_beyond_claim_horizon_reenqueues_without_claiming() {
        let mut state = ProviderState::new(5_000);
        state.delay_ms = 100;
        state.consecutive_rate_limit_failures = 1;
        state.next_send_time = 10_000;
        let mut scratch = Scratch::default();

        // claim_horizon = min(100 * 10, 5000) = 1000; wait = 10000 > 1000
        let decision = decide(&mut state, &mut scratch, &config(), 0);

        assert!(matches!(decision.verdict, Verdict::Reenqueue(_)));
        assert_eq!(scratch.claimed_slot, None);
        // next_send_time is untouched when we don't claim
        assert_eq!(state.next_send_time, 10_000);
    }

    #[test]
    fn stale_head_collapses_to_now() {
        let mut state = ProviderState::new(5_000);
        state.next_send_time = 100;
        let mut scratch = Scratch::default();

        let decision = decide(&mut state, &mut scratch, &config(), 10_000);

        assert_eq!(decision.verdict, Verdict::Proceed);
        assert_eq!(state.next_send_time, 10_000 + config().min_delay);
    }
}
