//! Kokoro-82M exported to ONNX

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use serde::Serialize;
use tracing::info;
use vocalis_core::{FamilyConfig, InferenceOptions, ModelLoader, ModelManager, ModelMetadata, ModelTask};
use vocalis_models::{
    find_file, require_file, AuxiliaryAsset, CachedRepo, CatalogClient, FamilyExecutor, HubCache,
    HubRegistry, MappedWeights, ModelCard, ModelError, ModelFamily, ModelFilter, ModelRegistry,
    RemoteModel,
};

use crate::error::TtsError;
use crate::voice::{SpeechModel, Voice};

pub const LIBRARY_NAME: &str = "onnx";
pub const SAMPLE_RATE: u32 = 24000;
const TASK: ModelTask = ModelTask::TextToSpeech;
const TAGS: [&str; 2] = ["speaches", "kokoro"];

/// Original upstream repo; it ships no `voices.bin`
pub const LEGACY_MODEL_ID: &str = "hexgrad/Kokoro-82M";
pub const LEGACY_VOICES_URL: &str =
    "https://github.com/thewh1teagle/kokoro-onnx/releases/download/model-files/voices.bin";

/// Accepted weight file names, in lookup order
const MODEL_FILES: [&str; 3] = ["model.onnx", "kokoro-v1.0.onnx", "kokoro-v0_19.onnx"];
const VOICES_FILE: &str = "voices.bin";

const ALLOW_PATTERNS: &[&str] = &[
    "model.onnx",
    "kokoro-v1.0.onnx",
    "kokoro-v0_19.onnx",
    "voices.bin",
    "README.md",
];

pub const LANGUAGES: [&str; 6] = ["en-us", "en-gb", "fr-fr", "ja", "ko", "cmn"];

pub const VOICE_IDS: [&str; 11] = [
    "af",
    "af_bella",
    "af_sarah",
    "am_adam",
    "am_michael",
    "bf_emma",
    "bf_isabella",
    "bm_george",
    "bm_lewis",
    "af_nicole",
    "af_sky",
];

pub type KokoroRegistry = HubRegistry<KokoroFamily>;
pub type KokoroExecutor = FamilyExecutor<KokoroRegistry, KokoroLoader>;

/// Accent of a voice id: `a*` American, `b*` British
fn voice_language(voice_id: &str) -> &'static str {
    match voice_id.chars().next() {
        Some('b') => "en-gb",
        _ => "en-us",
    }
}

pub fn voices() -> Vec<Voice> {
    VOICE_IDS
        .iter()
        .map(|id| Voice {
            name: id.to_string(),
            language: voice_language(id).to_string(),
        })
        .collect()
}

fn speech_model(metadata: ModelMetadata) -> SpeechModel {
    SpeechModel {
        metadata,
        sample_rate: SAMPLE_RATE,
        voices: voices(),
    }
}

/// Kokoro model files
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KokoroFiles {
    pub model: PathBuf,
    pub voices: PathBuf,
}

pub struct KokoroFamily {
    filter: ModelFilter,
}

impl Default for KokoroFamily {
    fn default() -> Self {
        Self {
            filter: ModelFilter::new().library(LIBRARY_NAME).task(TASK).tags(TAGS),
        }
    }
}

impl ModelFamily for KokoroFamily {
    type Model = SpeechModel;
    type Files = KokoroFiles;

    fn name(&self) -> &'static str {
        "kokoro"
    }

    fn filter(&self) -> &ModelFilter {
        &self.filter
    }

    fn allow_patterns(&self) -> &[&'static str] {
        ALLOW_PATTERNS
    }

    fn auxiliary_assets(&self, model_id: &str) -> Vec<AuxiliaryAsset> {
        if model_id != LEGACY_MODEL_ID {
            return Vec::new();
        }
        vec![AuxiliaryAsset {
            filename: VOICES_FILE.to_string(),
            url: LEGACY_VOICES_URL.to_string(),
        }]
    }

    fn remote_metadata(&self, model: &RemoteModel) -> Option<SpeechModel> {
        model.metadata(TASK).map(speech_model)
    }

    fn local_metadata(&self, repo: &CachedRepo, card: &ModelCard) -> Option<SpeechModel> {
        Some(speech_model(repo.metadata(card, TASK)))
    }

    fn resolve_files(&self, model_id: &str, files: &[PathBuf]) -> Result<KokoroFiles, ModelError> {
        let model = MODEL_FILES
            .iter()
            .find_map(|name| find_file(files, name))
            .ok_or_else(|| {
                ModelError::ModelNotFound(format!("{model_id} (missing {})", MODEL_FILES.join(" or ")))
            })?;
        Ok(KokoroFiles {
            model,
            voices: require_file(files, model_id, VOICES_FILE)?,
        })
    }
}

/// A loaded Kokoro model
#[derive(Debug)]
pub struct KokoroModel {
    model_id: String,
    files: KokoroFiles,
    weights: MappedWeights,
    voice_table: MappedWeights,
    options: InferenceOptions,
}

impl KokoroModel {
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn files(&self) -> &KokoroFiles {
        &self.files
    }

    pub fn weights(&self) -> &MappedWeights {
        &self.weights
    }

    /// Raw voice style table (`voices.bin`)
    pub fn voice_table(&self) -> &MappedWeights {
        &self.voice_table
    }

    pub fn options(&self) -> &InferenceOptions {
        &self.options
    }

    pub fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    pub fn check_voice(&self, voice: &str) -> Result<(), TtsError> {
        if VOICE_IDS.contains(&voice) {
            Ok(())
        } else {
            Err(TtsError::UnknownVoice(voice.to_string()))
        }
    }

    /// Phonemizer language, normalized to lower case
    pub fn check_language(&self, language: &str) -> Result<String, TtsError> {
        let language = language.to_ascii_lowercase().replace('_', "-");
        if LANGUAGES.contains(&language.as_str()) {
            Ok(language)
        } else {
            Err(TtsError::UnsupportedLanguage(language))
        }
    }
}

pub struct KokoroLoader {
    registry: Arc<KokoroRegistry>,
    options: InferenceOptions,
}

impl KokoroLoader {
    pub fn new(registry: Arc<KokoroRegistry>, options: InferenceOptions) -> Self {
        Self { registry, options }
    }
}

impl ModelLoader for KokoroLoader {
    type Model = KokoroModel;

    fn load(&self, model_id: &str) -> anyhow::Result<KokoroModel> {
        let start = Instant::now();
        let files = self.registry.resolve_files(model_id)?;
        let weights = MappedWeights::open(&files.model)
            .with_context(|| format!("failed to map {}", files.model.display()))?;
        let voice_table = MappedWeights::open(&files.voices)
            .with_context(|| format!("failed to map {}", files.voices.display()))?;

        info!(
            "Loaded Kokoro model {} on {} in {:.2}s",
            model_id,
            self.options.device,
            start.elapsed().as_secs_f64()
        );
        Ok(KokoroModel {
            model_id: model_id.to_string(),
            files,
            weights,
            voice_table,
            options: self.options,
        })
    }
}

/// Registry and manager for Kokoro models
pub fn kokoro_executor(cache: HubCache, catalog: CatalogClient, config: &FamilyConfig) -> KokoroExecutor {
    let registry = Arc::new(HubRegistry::new(KokoroFamily::default(), cache, catalog));
    let loader = KokoroLoader::new(Arc::clone(&registry), config.inference_options());
    FamilyExecutor::new(registry, ModelManager::new(loader, config.ttl))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use vocalis_core::Ttl;

    const CARD: &str = "---\nlibrary_name: onnx\npipeline_tag: text-to-speech\ntags:\n- speaches\n- kokoro\nlanguage: multilingual\n---\n";

    fn cache_repo(root: &Path, model_id: &str, files: &[(&str, &str)]) -> PathBuf {
        let repo = root.join(format!("models--{}", model_id.replace('/', "--")));
        let snapshot = repo.join("snapshots").join("beef");
        fs::create_dir_all(&snapshot).unwrap();
        fs::create_dir_all(repo.join("refs")).unwrap();
        fs::write(repo.join("refs").join("main"), "beef").unwrap();
        fs::write(snapshot.join("README.md"), CARD).unwrap();
        for (name, content) in files {
            fs::write(snapshot.join(name), content).unwrap();
        }
        snapshot
    }

    fn executor(root: &Path) -> KokoroExecutor {
        kokoro_executor(
            HubCache::new(root),
            CatalogClient::new("http://127.0.0.1:9", None).unwrap(),
            &FamilyConfig {
                ttl: Ttl::Never,
                ..FamilyConfig::default()
            },
        )
    }

    #[test]
    fn test_voice_list() {
        let voices = voices();
        assert_eq!(voices.len(), 11);
        assert_eq!(voices[0].name, "af");
        assert_eq!(voices[0].language, "en-us");
        let emma = voices.iter().find(|v| v.name == "bf_emma").unwrap();
        assert_eq!(emma.language, "en-gb");
    }

    #[test]
    fn test_voices_asset_only_for_legacy_repo() {
        let family = KokoroFamily::default();
        assert!(family.auxiliary_assets("speaches-ai/Kokoro-82M-v1.0-ONNX").is_empty());

        let assets = family.auxiliary_assets(LEGACY_MODEL_ID);
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].filename, "voices.bin");
        assert_eq!(assets[0].url, LEGACY_VOICES_URL);
    }

    #[test]
    fn test_resolve_alternate_model_names() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = cache_repo(
            dir.path(),
            "speaches-ai/Kokoro-82M-v1.0-ONNX",
            &[("kokoro-v1.0.onnx", "onnx"), ("voices.bin", "voices")],
        );
        cache_repo(dir.path(), "speaches-ai/Kokoro-82M-v1.0-ONNX-int8", &[("voices.bin", "v")]);
        let executor = executor(dir.path());

        let files = executor
            .registry()
            .resolve_files("speaches-ai/Kokoro-82M-v1.0-ONNX")
            .unwrap();
        assert_eq!(files.model, snapshot.join("kokoro-v1.0.onnx"));
        assert_eq!(files.voices, snapshot.join("voices.bin"));

        let err = executor
            .registry()
            .resolve_files("speaches-ai/Kokoro-82M-v1.0-ONNX-int8")
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_local_metadata() {
        let dir = tempfile::tempdir().unwrap();
        cache_repo(
            dir.path(),
            "speaches-ai/Kokoro-82M-v1.0-ONNX",
            &[("model.onnx", "onnx"), ("voices.bin", "voices")],
        );
        let models = executor(dir.path()).list_local();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].sample_rate, 24000);
        assert_eq!(models[0].voices.len(), VOICE_IDS.len());
        assert_eq!(models[0].metadata.language, vec!["multilingual"]);
    }

    #[tokio::test]
    async fn test_load_and_validate_requests() {
        let dir = tempfile::tempdir().unwrap();
        cache_repo(
            dir.path(),
            "speaches-ai/Kokoro-82M-v1.0-ONNX",
            &[("model.onnx", "onnx"), ("voices.bin", "voices")],
        );
        let executor = executor(dir.path());

        let model = executor.acquire("speaches-ai/Kokoro-82M-v1.0-ONNX").await.unwrap();
        assert_eq!(model.voice_table().as_bytes(), b"voices");
        assert_eq!(model.sample_rate(), 24000);
        assert!(model.check_voice("af_sky").is_ok());
        assert!(matches!(model.check_voice("zz"), Err(TtsError::UnknownVoice(_))));
        assert_eq!(model.check_language("EN_US").unwrap(), "en-us");
        assert!(model.check_language("de").is_err());
        drop(model);

        executor.unload("speaches-ai/Kokoro-82M-v1.0-ONNX").unwrap();
        assert!(executor.loaded_models().is_empty());
    }
}
