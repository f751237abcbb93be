//! Top-level daemon configuration and run loop.
//!
//! Deserializes the engine and metrics configuration from one RON
//! document, then drives the pacing engine's timer loop and the
//! metrics HTTP server side by side until a shutdown signal arrives.

use std::path::Path;
use std::sync::Arc;
use std::sync::LazyLock;

use pacer_common::{internal, logging, tracing, Signal};
use pacer_core::{ConfigError, EngineConfig, MessageId, PacingEngine, Verdict};
use pacer_metrics::{MetricsConfig, MetricsRegistry, MetricsServer};
use serde::Deserialize;
use tokio::sync::broadcast;

#[derive(Debug, Default, Deserialize)]
pub struct Pacer {
    #[serde(alias = "engine", default)]
    engine: EngineConfig,
    #[serde(alias = "metrics", default)]
    metrics: MetricsConfig,
}

/// Settings for the synthetic message generator the demo binary drives
/// the engine with, standing in for a host's real outbound delivery
/// path.
#[derive(Debug, Clone)]
pub struct DemoConfig {
    pub providers: Vec<String>,
    pub interval_ms: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            providers: vec!["gmail.com".into(), "outlook.com".into(), "yahoo.com".into()],
            interval_ms: 2_000,
        }
    }
}

/// Cycles through `demo.providers` on a timer, calling the engine's
/// `on_send`/`on_delivered` callbacks as a stand-in for a host's real
/// outbound delivery path, so the metrics and pacing state have
/// something to show.
async fn generate_traffic(engine: PacingEngine, demo: DemoConfig) {
    if demo.providers.is_empty() {
        return;
    }

    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(demo.interval_ms.max(1)));
    let mut index = 0usize;

    loop {
        ticker.tick().await;

        let domain = &demo.providers[index % demo.providers.len()];
        index = index.wrapping_add(1);

        let message_id = MessageId::new();
        match engine.on_send(message_id, Some(domain), None) {
            Verdict::Proceed => engine.on_delivered(message_id, domain, None),
            Verdict::Wait(ms) => {
                tokio::time::sleep(std::time::Duration::from_millis(ms.max(1))).await;
                engine.on_delivered(message_id, domain, None);
            }
            Verdict::Reenqueue(_) => {}
        }
    }
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!("CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!("Terminate Signal received, shutting down");
        }
    };

    let mut receiver = SHUTDOWN_BROADCAST.subscribe();

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    loop {
        tokio::select! {
            sig = receiver.recv() => {
                match sig {
                    Ok(s) => tracing::debug!("Received {s:?}"),
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(e) => tracing::debug!("Received: {e:?}"),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    Ok(())
}

impl Pacer {
    /// Load a controller configuration from a RON document at `path`.
    ///
    /// Malformed individual numeric/boolean fields inside the `engine`
    /// section fall back to their defaults per §4.2/§7 (and are logged
    /// where they occur); this only errors on an unreadable file or a
    /// document that fails to parse as RON at the structural level.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if `path` can't be read, or
    /// [`ConfigError::Parse`] if the contents aren't valid RON.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        ron::de::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Run this controller, and everything it controls.
    ///
    /// The metrics HTTP server binds lazily, off the engine's first
    /// `on_send` rather than at startup, per §4.8 — in this demo
    /// that's the first tick of `generate_traffic`.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics registry fails to construct or
    /// the signal handlers can't be installed. A metrics bind failure
    /// degrades to a disabled server rather than propagating.
    pub async fn run(self, demo: DemoConfig) -> anyhow::Result<()> {
        logging::init();

        internal!("Controller running");

        let registry = if self.metrics.enabled {
            Some(Arc::new(MetricsRegistry::new()?))
        } else {
            None
        };

        let engine = PacingEngine::new(self.engine, registry.clone());
        engine.restore_from_snapshot();

        let metrics_config = self.metrics;
        let metrics_ready = engine.metrics_ready();

        let ret: anyhow::Result<()> = tokio::select! {
            () = engine.serve(SHUTDOWN_BROADCAST.subscribe()) => Ok(()),
            () = generate_traffic(engine.clone(), demo) => Ok(()),
            r = async move {
                let Some(registry) = registry else {
                    return std::future::pending::<anyhow::Result<()>>().await;
                };
                metrics_ready.notified().await;
                match MetricsServer::try_bind(&metrics_config, registry).await {
                    Some(server) => server.serve(SHUTDOWN_BROADCAST.subscribe()).await.map_err(anyhow::Error::from),
                    None => std::future::pending::<anyhow::Result<()>>().await,
                }
            } => r,
            r = shutdown() => r,
        };

        internal!("Shutting down...");

        ret
    }
}
