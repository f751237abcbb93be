//! MX normalization: map a recipient domain and/or MX hostname to the
//! canonical provider key that pacing, backoff, and the circuit breaker
//! are all keyed on.

use dashmap::DashMap;
use pacer_common::ProviderKey;

/// Second-level suffixes where the canonical base domain needs three
/// labels instead of two (`mx.example.co.uk` → `example.co.uk`, not
/// `co.uk`).
const SECOND_LEVEL_SUFFIXES: &[&str] = &[
    "co.uk", "com.au", "co.nz", "co.jp", "co.za", "com.br", "com.mx",
];

/// Canonicalization entries applied to an MX host's base domain.
const CANONICALIZATION_MAP: &[(&str, &str)] = &[
    ("yahoodns.net", "yahoo.com"),
    ("googlemail.com", "google.com"),
    ("protection.outlook.com", "outlook.com"),
    ("mail.protection.outlook.com", "outlook.com"),
];

/// Consumer-facing domain aliases that map straight to a canonical
/// provider, used when no MX hostname is available.
const KNOWN_PROVIDER_TABLE: &[(&str, &str)] = &[
    ("gmail.com", "google.com"),
    ("googlemail.com", "google.com"),
    ("hotmail.com", "outlook.com"),
    ("live.com", "outlook.com"),
    ("msn.com", "outlook.com"),
    ("outlook.com", "outlook.com"),
    ("ymail.com", "yahoo.com"),
    ("rocketmail.com", "yahoo.com"),
    ("yahoo.com", "yahoo.com"),
];

/// Resolves provider keys and remembers recipient→provider mappings
/// learned from MX lookups, for later calls that have no MX handy.
pub struct MxNormalizer {
    cache: DashMap<String, ProviderKey>,
}

impl MxNormalizer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
        }
    }

    /// Resolve the canonical provider key for a delivery attempt.
    ///
    /// Mapping is case-insensitive; the result and all cache keys are
    /// lowercase.
    #[must_use]
    pub fn normalize(&self, recipient_domain: &str, mx_hostname: Option<&str>) -> ProviderKey {
        let recipient_domain = recipient_domain.to_ascii_lowercase();

        if let Some(mx) = mx_hostname {
            let base = base_domain(&mx.to_ascii_lowercase());
            let canonical = canonicalize(&base);
            let key = ProviderKey::new(canonical);
            self.cache.insert(recipient_domain, key.clone());
            return key;
        }

        if let Some((_, provider)) = KNOWN_PROVIDER_TABLE
            .iter()
            .find(|(alias, _)| *alias == recipient_domain)
        {
            return ProviderKey::new(*provider);
        }

        if let Some(cached) = self.cache.get(&recipient_domain) {
            return cached.clone();
        }

        ProviderKey::new(recipient_domain)
    }

    /// Every known-provider alias that resolves to `provider`, used by
    /// the config resolver and enabled-provider checks to honor
    /// per-alias overrides.
    #[must_use]
    pub fn aliases_for(provider: &str) -> Vec<&'static str> {
        KNOWN_PROVIDER_TABLE
            .iter()
            .filter(|(_, p)| *p == provider)
            .map(|(alias, _)| *alias)
            .collect()
    }
}

impl Default for MxNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

fn base_domain(host: &str) -> String {
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 2 {
        return host.to_string();
    }

    let last_two = labels[labels.len() - 2..].join(".");
    if labels.len() >= 3 && SECOND_LEVEL_SUFFIXES.contains(&last_two.as_str()) {
        labels[labels.len() - 3..].join(".")
    } else {
        last_two
    }
}

fn canonicalize(base: &str) -> String {
    CANONICALIZATION_MAP
        .iter()
        .find(|(from, _)| *from == base)
        .map_or_else(|| base.to_string(), |(_, to)| (*to).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gmail_mx_resolves_to_google() {
        let normalizer = MxNormalizer::new();
        let key = normalizer.normalize("gmail.com", Some("aspmx.l.google.com"));
        assert_eq!(key.as_str(), "google.com");
    }

    #[test]
    fn yahoodns_mx_is_canonicalized_to_yahoo() {
        let normalizer = MxNormalizer::new();
        let key = normalizer.normalize("yahoo.com", Some("mta5.am0.yahoodns.net"));
        assert_eq!(key.as_str(), "yahoo.com");
    }

    #[test]
    fn cctld_suffix_without_canonicalization_keeps_three_labels() {
        let normalizer = MxNormalizer::new();
        let key = normalizer.normalize("example.com.au", Some("mx.example.com.au"));
        assert_eq!(key.as_str(), "example.com.au");
    }

    #[test]
    fn known_provider_table_used_without_mx() {
        let normalizer = MxNormalizer::new();
        let key = normalizer.normalize("gmail.com", None);
        assert_eq!(key.as_str(), "google.com");
    }

    #[test]
    fn cache_learned_from_mx_is_used_on_later_lookup() {
        let normalizer = MxNormalizer::new();
        normalizer.normalize("customdomain.com", Some("mail.protection.outlook.com"));
        let key = normalizer.normalize("customdomain.com", None);
        assert_eq!(key.as_str(), "outlook.com");
    }

    #[test]
    fn unknown_domain_without_mx_or_cache_falls_back_to_itself() {
        let normalizer = MxNormalizer::new();
        let key = normalizer.normalize("some-isp.example", None);
        assert_eq!(key.as_str(), "some-isp.example");
    }

    #[test]
    fn aliases_for_returns_known_mappings() {
        let aliases = MxNormalizer::aliases_for("google.com");
        assert!(aliases.contains(&"gmail.com"));
        assert!(aliases.contains(&"googlemail.com"));
    }
}
