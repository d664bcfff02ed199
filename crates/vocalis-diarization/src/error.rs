//! Diarization error types

use thiserror::Error;
use vocalis_models::ModelError;

/// Diarization-related errors
#[derive(Error, Debug)]
pub enum DiarizationError {
    /// `config.yaml` is missing required keys or is malformed
    #[error("Invalid pipeline config: {0}")]
    InvalidPipeline(String),

    /// A model the pipeline references is not in the cache
    #[error("Pipeline dependency missing: {0}")]
    MissingDependency(String),

    /// Registry or cache error
    #[error(transparent)]
    Model(#[from] ModelError),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
