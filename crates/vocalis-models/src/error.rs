//! Model management error types

use thiserror::Error;
use vocalis_core::LifecycleError;

/// Model management errors
#[derive(Error, Debug)]
pub enum ModelError {
    /// Model is unknown to the local cache (and, where consulted, the catalog)
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Download failed
    #[error("Download failed: {0}")]
    DownloadFailed(String),

    /// Verification failed
    #[error("Model verification failed: expected {expected}, got {actual}")]
    VerificationFailed {
        expected: String,
        actual: String,
    },

    /// Cache directory error
    #[error("Failed to access cache directory: {0}")]
    CacheDirectoryError(String),

    /// Model card front matter could not be parsed
    #[error("Invalid model card: {0}")]
    InvalidModelCard(String),

    /// A cached model file is present but unusable
    #[error("Invalid model file: {0}")]
    InvalidModelFile(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Acquire or unload failed
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl ModelError {
    /// Whether the model id was unknown
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ModelError::ModelNotFound(_) | ModelError::Lifecycle(LifecycleError::NotFound(_))
        )
    }
}
