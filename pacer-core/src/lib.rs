//! Adaptive outbound delivery pacing engine.
//!
//! Tracks per-destination-provider pacing state, applies exponential
//! backoff and a circuit breaker on rate-limit signals, and exposes a
//! small set of callbacks a host's outbound delivery path invokes
//! around every send attempt. See [`engine::PacingEngine`] for the
//! entry point.

#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

mod classifier;
mod config;
mod engine;
mod error;
mod mx;
mod outcome;
mod scheduler;
mod scratch;
mod snapshot;
mod state;

pub use classifier::{classify, DeferralClass};
pub use config::{
    EffectiveConfig, EnabledProviders, EngineConfig, GlobalDefaults, MainConfig, OverrideRegistry,
    ProviderOverride, SnapshotConfig,
};
pub use engine::{PacingEngine, ProviderStats};
pub use error::{ConfigError, EngineError, MetricsBindError, SnapshotError};
pub use mx::MxNormalizer;
pub use outcome::CircuitEvent;
pub use scheduler::{Decision, Verdict};
pub use scratch::{MessageId, Scratch, ScratchStore};
pub use snapshot::{PersistedProviderState, Snapshot};
pub use state::{ProviderState, ProviderStateStore};
