//! ASR error types

use thiserror::Error;
use vocalis_models::ModelError;

/// ASR-related errors
#[derive(Error, Debug)]
pub enum AsrError {
    /// Language not served by the loaded model
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// Malformed vocabulary file
    #[error("Invalid vocabulary: {0}")]
    InvalidVocabulary(String),

    /// Registry or cache error
    #[error(transparent)]
    Model(#[from] ModelError),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
