//! Error types for the metrics surface

use thiserror::Error;

/// Errors that can occur while standing up or serving the metrics surface
///
/// Per the engine's error handling policy, every variant here is a
/// degrade-not-propagate case: a bind failure disables the server and
/// logs, it never takes the engine down.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Failed to bind the metrics HTTP server to its configured port
    #[error("failed to bind metrics server to 0.0.0.0:{port}: {source}")]
    Bind { port: u16, source: std::io::Error },

    /// The metrics HTTP server hit a runtime error while serving
    #[error("metrics server error: {0}")]
    Server(String),

    /// Registering or encoding a metric with the underlying registry failed
    #[error("prometheus registry error: {0}")]
    Registry(#[from] prometheus::Error),
}
