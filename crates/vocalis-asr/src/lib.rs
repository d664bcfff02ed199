//! Speech recognition model families
//!
//! Whisper (CTranslate2 layout) and Parakeet TDT (ONNX) registries and
//! loaders, each served through a [`vocalis_models::FamilyExecutor`].

pub mod error;
pub mod languages;
pub mod parakeet;
pub mod whisper;

pub use error::AsrError;
pub use parakeet::{parakeet_executor, ParakeetExecutor, ParakeetFamily, ParakeetFiles, ParakeetModel};
pub use whisper::{whisper_executor, WhisperExecutor, WhisperFamily, WhisperFiles, WhisperModel};
