pub mod logging;
pub mod provider_key;

pub use provider_key::ProviderKey;
pub use tracing;

/// A shutdown signal broadcast to every long-running service loop.
#[derive(Debug, Clone, Copy)]
pub enum Signal {
    Shutdown,
    Finalised,
}
