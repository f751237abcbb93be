//! Classify a deferral's error message as rate-limit or not.
//!
//! Non-rate-limit deferrals are recipient-specific (mailbox full,
//! transient TLS, local policy) and must not disturb provider-wide
//! pacing or block recovery — only a rate-limit classification drives
//! `delay_ms` and the circuit breaker.

/// The outcome of classifying a deferral's error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferralClass {
    RateLimit,
    NonRateLimit,
}

const RATE_LIMIT_SUBSTRINGS: &[&str] = &["too many", "try again later", "throttl"];

/// Classify `error_message`. A missing or non-string message (callers
/// pass an empty string) is treated as non-rate-limit per §7.
#[must_use]
pub fn classify(error_message: &str) -> DeferralClass {
    let lower = error_message.to_ascii_lowercase();

    if lower.contains("421") || lower.contains("4.7.28") {
        return DeferralClass::RateLimit;
    }

    if RATE_LIMIT_SUBSTRINGS.iter().any(|needle| lower.contains(needle)) {
        return DeferralClass::RateLimit;
    }

    if contains_rate_limit_phrase(&lower) {
        return DeferralClass::RateLimit;
    }

    DeferralClass::NonRateLimit
}

/// Matches "rate limit", "rate-limit", and "rate  limit" (arbitrary
/// whitespace or a single hyphen between the words).
fn contains_rate_limit_phrase(lower: &str) -> bool {
    let Some(rate_pos) = lower.find("rate") else {
        return false;
    };
    let after_rate = &lower[rate_pos + "rate".len()..];
    let trimmed = after_rate.trim_start_matches([' ', '-']);
    trimmed.starts_with("limit")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_421_as_rate_limit() {
        assert_eq!(classify("421 4.7.28 rate limited"), DeferralClass::RateLimit);
    }

    #[test]
    fn classifies_enhanced_code_as_rate_limit() {
        assert_eq!(
            classify("450 4.7.28 too many connections"),
            DeferralClass::RateLimit
        );
    }

    #[test]
    fn classifies_rate_limit_with_hyphen() {
        assert_eq!(classify("Please slow down, rate-limit exceeded"), DeferralClass::RateLimit);
    }

    #[test]
    fn classifies_throttled_as_rate_limit() {
        assert_eq!(classify("You are being throttled"), DeferralClass::RateLimit);
    }

    #[test]
    fn classifies_try_again_later_as_rate_limit() {
        assert_eq!(classify("try again later"), DeferralClass::RateLimit);
    }

    #[test]
    fn classifies_mailbox_full_as_non_rate_limit() {
        assert_eq!(
            classify("452 4.2.2 Mailbox full"),
            DeferralClass::NonRateLimit
        );
    }

    #[test]
    fn classifies_empty_message_as_non_rate_limit() {
        assert_eq!(classify(""), DeferralClass::NonRateLimit);
    }

    #[test]
    fn classification_is_case_insensitive() {
        assert_eq!(classify("RATE LIMIT EXCEEDED"), DeferralClass::RateLimit);
    }
}
