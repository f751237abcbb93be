//! Prometheus metrics and a minimal HTTP exposition surface.
//!
//! This crate owns every counter and gauge named by the metrics surface
//! and exposes them over `/metrics` (Prometheus text), `/health`, and
//! `/stats`. It has no notion of deliveries, spools, or SMTP — it only
//! knows provider keys and the numbers attached to them.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pacer_metrics::{MetricsConfig, MetricsRegistry, MetricsServer};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(MetricsRegistry::new()?);
//! let config = MetricsConfig::default();
//! if let Some(server) = MetricsServer::try_bind(&config, registry.clone()).await {
//!     let (_tx, rx) = tokio::sync::broadcast::channel(1);
//!     server.serve(rx).await?;
//! }
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod registry;
mod server;

pub use config::MetricsConfig;
pub use error::MetricsError;
pub use registry::MetricsRegistry;
pub use server::MetricsServer;
