//! TTS error types

use thiserror::Error;
use vocalis_models::ModelError;

/// TTS-related errors
#[derive(Error, Debug)]
pub enum TtsError {
    /// Model id does not follow the voice naming scheme
    #[error("Invalid voice name: {0}")]
    InvalidVoiceName(String),

    /// Voice not offered by the model
    #[error("Unknown voice: {0}")]
    UnknownVoice(String),

    /// Language not offered by the model
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// Registry or cache error
    #[error(transparent)]
    Model(#[from] ModelError),
}
