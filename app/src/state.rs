//! Application state management

use vocalis_asr::{parakeet_executor, whisper_executor, ParakeetExecutor, WhisperExecutor};
use vocalis_core::{Config, Family};
use vocalis_diarization::{pyannote_executor, PyannoteExecutor};
use vocalis_models::{CatalogClient, HubCache, ModelError};
use vocalis_tts::{kokoro_executor, piper_executor, KokoroExecutor, PiperExecutor};

/// Main application state: one executor per model family
pub struct AppState {
    pub whisper: WhisperExecutor,
    pub parakeet: ParakeetExecutor,
    pub piper: PiperExecutor,
    pub kokoro: KokoroExecutor,
    pub pyannote: PyannoteExecutor,
}

impl AppState {
    /// All families share one cache and one catalog client
    pub fn new(config: &Config) -> Result<Self, ModelError> {
        let cache = HubCache::new(&config.cache_dir);
        cache.ensure_root()?;
        let catalog = CatalogClient::new(&config.catalog_url, config.hf_token.clone())?;

        Ok(Self {
            whisper: whisper_executor(cache.clone(), catalog.clone(), &config.family(Family::Whisper)),
            parakeet: parakeet_executor(
                cache.clone(),
                catalog.clone(),
                &config.family(Family::Parakeet),
            ),
            piper: piper_executor(cache.clone(), catalog.clone(), &config.family(Family::Piper)),
            kokoro: kokoro_executor(cache.clone(), catalog.clone(), &config.family(Family::Kokoro)),
            pyannote: pyannote_executor(cache, catalog, &config.family(Family::Pyannote)),
        })
    }

    /// Unload every idle model, returning `(family, model_id)` of those still in use
    pub fn shutdown(&self) -> Vec<(Family, String)> {
        let busy = [
            (Family::Whisper, self.whisper.shutdown()),
            (Family::Parakeet, self.parakeet.shutdown()),
            (Family::Piper, self.piper.shutdown()),
            (Family::Kokoro, self.kokoro.shutdown()),
            (Family::Pyannote, self.pyannote.shutdown()),
        ];
        busy.into_iter()
            .flat_map(|(family, ids)| ids.into_iter().map(move |id| (family, id)))
            .collect()
    }
}
