//! Speech synthesis model families
//!
//! Piper voices and Kokoro models, each served through a
//! [`vocalis_models::FamilyExecutor`]. Both report [`SpeechModel`] metadata:
//! the common model record plus output sample rate and voices.

pub mod error;
pub mod kokoro;
pub mod piper;
pub mod voice;

pub use error::TtsError;
pub use kokoro::{kokoro_executor, KokoroExecutor, KokoroFamily, KokoroFiles, KokoroModel};
pub use piper::{piper_executor, PiperExecutor, PiperFamily, PiperFiles, PiperModel, VoiceQuality};
pub use voice::{SpeechModel, Voice};
