//! Metrics/health HTTP server
//!
//! Exposes `/metrics` (Prometheus text), `/health` (plain "OK"), and
//! `/stats` (JSON dump of the same series) on a single router.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use pacer_common::Signal;
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;

use crate::{MetricsConfig, MetricsError, MetricsRegistry};

/// Metrics/health HTTP server
///
/// Per the exposition policy, the server starts lazily — on the first
/// outbound scheduler entry, in the process that actually owns the
/// counters — and a bind-in-use error is logged and swallowed rather
/// than treated as fatal; see [`MetricsServer::try_bind`].
pub struct MetricsServer {
    listener: TcpListener,
    router: Router,
}

impl MetricsServer {
    /// Bind the server to `0.0.0.0:<config.port>`
    ///
    /// # Errors
    ///
    /// Returns an error if binding the port fails. Callers are expected
    /// to log and continue rather than treat this as fatal.
    pub async fn new(
        config: &MetricsConfig,
        registry: Arc<MetricsRegistry>,
    ) -> Result<Self, MetricsError> {
        let addr = format!("0.0.0.0:{}", config.port);
        let listener =
            TcpListener::bind(&addr)
                .await
                .map_err(|source| MetricsError::Bind {
                    port: config.port,
                    source,
                })?;

        tracing::info!(address = %addr, "metrics server bound successfully");

        let router = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/health", get(health_handler))
            .route("/stats", get(stats_handler))
            .with_state(registry)
            .layer(TimeoutLayer::new(Duration::from_secs(5)));

        Ok(Self { listener, router })
    }

    /// Bind the server, logging and returning `None` on failure instead
    /// of propagating — the degrade-not-propagate policy for this
    /// endpoint per the engine's error handling rules.
    pub async fn try_bind(config: &MetricsConfig, registry: Arc<MetricsRegistry>) -> Option<Self> {
        match Self::new(config, registry).await {
            Ok(server) => Some(server),
            Err(err) => {
                tracing::warn!(error = %err, "failed to bind metrics server, disabling it");
                None
            }
        }
    }

    /// Serve until a shutdown signal arrives
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP server errors while
    /// serving.
    pub async fn serve(
        self,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), MetricsError> {
        tracing::info!("metrics server starting");

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("metrics server received shutdown signal");
            })
            .await
            .map_err(|e| MetricsError::Server(e.to_string()))?;

        tracing::info!("metrics server stopped");
        Ok(())
    }
}

async fn metrics_handler(State(registry): State<Arc<MetricsRegistry>>) -> Response {
    match registry.encode_text() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "").into_response()
        }
    }
}

async fn health_handler() -> Response {
    (StatusCode::OK, "OK").into_response()
}

async fn stats_handler(State(registry): State<Arc<MetricsRegistry>>) -> Response {
    Json(registry.stats_json()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_handler_always_returns_ok() {
        let response = health_handler().await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_handler_returns_text_body() {
        let registry = Arc::new(MetricsRegistry::new().unwrap());
        registry.inc_deliveries("google.com");
        let response = metrics_handler(State(registry)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn stats_handler_returns_json_body() {
        let registry = Arc::new(MetricsRegistry::new().unwrap());
        registry.inc_bounces("google.com");
        let response = stats_handler(State(registry)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
