use mt_core::ConfigError;
use thiserror::Error;

/// Errors surfaced by the tracking service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// `spawn` was called outside a tokio runtime.
    #[error("no tokio runtime available to run the tracker")]
    NoRuntime,

    /// The worker has shut down.
    #[error("tracker service is stopped")]
    Stopped,

    /// A reloaded config was rejected; the previous one is still in effect.
    #[error("config rejected: {0}")]
    Config(#[from] ConfigError),
}
