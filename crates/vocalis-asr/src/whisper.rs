//! Whisper models in the CTranslate2 layout (faster-whisper repos)

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use vocalis_core::{FamilyConfig, InferenceOptions, ModelLoader, ModelManager, ModelMetadata, ModelTask};
use vocalis_models::{
    read_json, require_file, CachedRepo, CatalogClient, FamilyExecutor, HubCache, HubRegistry,
    MappedWeights, ModelCard, ModelError, ModelFamily, ModelFilter, ModelRegistry, RemoteModel,
};

use crate::error::AsrError;
use crate::languages::base_language;

pub const LIBRARY_NAME: &str = "ctranslate2";
const TASK: ModelTask = ModelTask::AutomaticSpeechRecognition;

/// Files faster-whisper reads, plus the card
const ALLOW_PATTERNS: &[&str] = &[
    "config.json",
    "preprocessor_config.json",
    "model.bin",
    "tokenizer.json",
    "vocabulary.*",
    "README.md",
];

pub type WhisperRegistry = HubRegistry<WhisperFamily>;
pub type WhisperExecutor = FamilyExecutor<WhisperRegistry, WhisperLoader>;

/// Whisper model files
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WhisperFiles {
    pub model: PathBuf,
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub preprocessor_config: PathBuf,
}

pub struct WhisperFamily {
    filter: ModelFilter,
}

impl Default for WhisperFamily {
    fn default() -> Self {
        Self {
            filter: ModelFilter::new().library(LIBRARY_NAME).task(TASK),
        }
    }
}

impl ModelFamily for WhisperFamily {
    type Model = ModelMetadata;
    type Files = WhisperFiles;

    fn name(&self) -> &'static str {
        "whisper"
    }

    fn filter(&self) -> &ModelFilter {
        &self.filter
    }

    fn allow_patterns(&self) -> &[&'static str] {
        ALLOW_PATTERNS
    }

    fn remote_metadata(&self, model: &RemoteModel) -> Option<ModelMetadata> {
        model.metadata(TASK)
    }

    fn local_metadata(&self, repo: &CachedRepo, card: &ModelCard) -> Option<ModelMetadata> {
        Some(repo.metadata(card, TASK))
    }

    fn resolve_files(&self, model_id: &str, files: &[PathBuf]) -> Result<WhisperFiles, ModelError> {
        Ok(WhisperFiles {
            model: require_file(files, model_id, "model.bin")?,
            config: require_file(files, model_id, "config.json")?,
            tokenizer: require_file(files, model_id, "tokenizer.json")?,
            preprocessor_config: require_file(files, model_id, "preprocessor_config.json")?,
        })
    }
}

/// Subset of the CTranslate2 `config.json`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct WhisperConfig {
    /// Token ids of the language tokens; empty for English-only models
    pub lang_ids: Vec<u32>,
    pub suppress_ids: Vec<i64>,
    pub suppress_ids_begin: Vec<i64>,
    pub alignment_heads: Vec<(u32, u32)>,
}

/// Feature extractor settings from `preprocessor_config.json`
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PreprocessorConfig {
    pub feature_size: u32,
    pub sampling_rate: u32,
    pub hop_length: u32,
    pub n_fft: u32,
    pub chunk_length: u32,
}

impl Default for PreprocessorConfig {
    fn default() -> Self {
        Self {
            feature_size: 80,
            sampling_rate: 16000,
            hop_length: 160,
            n_fft: 400,
            chunk_length: 30,
        }
    }
}

/// A loaded Whisper model
#[derive(Debug)]
pub struct WhisperModel {
    model_id: String,
    files: WhisperFiles,
    weights: MappedWeights,
    config: WhisperConfig,
    preprocessor: PreprocessorConfig,
    options: InferenceOptions,
}

impl WhisperModel {
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn files(&self) -> &WhisperFiles {
        &self.files
    }

    pub fn weights(&self) -> &MappedWeights {
        &self.weights
    }

    pub fn config(&self) -> &WhisperConfig {
        &self.config
    }

    pub fn preprocessor(&self) -> &PreprocessorConfig {
        &self.preprocessor
    }

    pub fn options(&self) -> &InferenceOptions {
        &self.options
    }

    pub fn is_multilingual(&self) -> bool {
        !self.config.lang_ids.is_empty()
    }

    /// Language code to decode with. English-only models reject anything else.
    pub fn check_language(&self, requested: &str) -> Result<String, AsrError> {
        let language = base_language(requested);
        if !self.is_multilingual() && language != "en" {
            return Err(AsrError::UnsupportedLanguage(format!(
                "{} is English-only, got {}",
                self.model_id, requested
            )));
        }
        Ok(language)
    }
}

/// Builds [`WhisperModel`]s from cached files
pub struct WhisperLoader {
    registry: Arc<WhisperRegistry>,
    options: InferenceOptions,
}

impl WhisperLoader {
    pub fn new(registry: Arc<WhisperRegistry>, options: InferenceOptions) -> Self {
        Self { registry, options }
    }
}

impl ModelLoader for WhisperLoader {
    type Model = WhisperModel;

    fn load(&self, model_id: &str) -> anyhow::Result<WhisperModel> {
        let start = Instant::now();
        let files = self.registry.resolve_files(model_id)?;
        debug!("Whisper files for {}: {:?}", model_id, files);

        let weights = MappedWeights::open(&files.model)
            .with_context(|| format!("failed to map {}", files.model.display()))?;
        let config: WhisperConfig = read_json(&files.config)?;
        let preprocessor: PreprocessorConfig = read_json(&files.preprocessor_config)?;

        info!(
            "Loaded Whisper model {} ({:.1} MB, {} on {}) in {:.2}s",
            model_id,
            weights.len() as f64 / 1_048_576.0,
            self.options.compute_type,
            self.options.device,
            start.elapsed().as_secs_f64()
        );
        Ok(WhisperModel {
            model_id: model_id.to_string(),
            files,
            weights,
            config,
            preprocessor,
            options: self.options,
        })
    }
}

/// Registry and manager for Whisper models
pub fn whisper_executor(
    cache: HubCache,
    catalog: CatalogClient,
    config: &FamilyConfig,
) -> WhisperExecutor {
    let registry = Arc::new(HubRegistry::new(WhisperFamily::default(), cache, catalog));
    let loader = WhisperLoader::new(Arc::clone(&registry), config.inference_options());
    FamilyExecutor::new(registry, ModelManager::new(loader, config.ttl))
}
