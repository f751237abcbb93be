//! Metrics configuration

use serde::Deserialize;

/// Configuration for the metrics/health HTTP surface
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Enable or disable the metrics server
    ///
    /// When disabled, the engine still accumulates counters in memory; it
    /// simply never exposes them over HTTP.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Port the metrics server binds on, across all interfaces
    ///
    /// The bind address is not otherwise configurable: the server always
    /// binds `0.0.0.0:<port>`.
    #[serde(default = "default_port")]
    pub port: u16,
}

const fn default_enabled() -> bool {
    true
}

const fn default_port() -> u16 {
    8081
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            port: default_port(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = MetricsConfig::default();
        assert!(config.enabled);
        assert_eq!(config.port, 8081);
    }

    #[test]
    fn deserializes_with_partial_overrides() {
        let config: MetricsConfig = ron::from_str("(port: 9000)").unwrap();
        assert!(config.enabled);
        assert_eq!(config.port, 9000);
    }
}
