//! Lifecycle error types

use thiserror::Error;

/// Errors raised while acquiring, sharing or unloading a model instance.
///
/// Cloneable so that a single load failure can be handed to every caller
/// that was waiting on the same load.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// No handle is registered for this model id
    #[error("Model not found: {0}")]
    NotFound(String),

    /// Model is in use or a load is in flight
    #[error("Model {0} is busy (in use or currently loading)")]
    Busy(String),

    /// The load function failed
    #[error("Failed to load model {model_id}: {reason}")]
    LoadFailed {
        model_id: String,
        reason: String,
    },

    /// Handle was evicted and removed from its manager; request a fresh one
    #[error("Model handle for {0} was retired after eviction")]
    Retired(String),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),
}
