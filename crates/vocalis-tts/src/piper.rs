//! Piper voices (one ONNX voice per repo)

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
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

use crate::error::TtsError;
use crate::voice::{SpeechModel, Voice};

pub const LIBRARY_NAME: &str = "onnx";
const TASK: ModelTask = ModelTask::TextToSpeech;
const TAGS: [&str; 2] = ["speaches", "piper"];
const REPO_PREFIX: &str = "piper-";

const ALLOW_PATTERNS: &[&str] = &["model.onnx", "config.json", "README.md"];

pub type PiperRegistry = HubRegistry<PiperFamily>;
pub type PiperExecutor = FamilyExecutor<PiperRegistry, PiperLoader>;

/// Voice quality tier, which fixes the output sample rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceQuality {
    XLow,
    Low,
    Medium,
    High,
}

impl VoiceQuality {
    pub fn sample_rate(&self) -> u32 {
        match self {
            VoiceQuality::XLow => 16000,
            VoiceQuality::Low | VoiceQuality::Medium | VoiceQuality::High => 22050,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VoiceQuality::XLow => "x_low",
            VoiceQuality::Low => "low",
            VoiceQuality::Medium => "medium",
            VoiceQuality::High => "high",
        }
    }
}

impl fmt::Display for VoiceQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoiceQuality {
    type Err = TtsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "x_low" => Ok(VoiceQuality::XLow),
            "low" => Ok(VoiceQuality::Low),
            "medium" => Ok(VoiceQuality::Medium),
            "high" => Ok(VoiceQuality::High),
            other => Err(TtsError::InvalidVoiceName(format!("unknown quality: {other}"))),
        }
    }
}

/// Parts of a Piper repo name, e.g. `speaches-ai/piper-en_US-amy-medium`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PiperVoiceName {
    /// `en_US`
    pub language_region: String,
    /// `amy`
    pub name: String,
    pub quality: VoiceQuality,
}

impl PiperVoiceName {
    /// Parse the last path segment of a model id; the `piper-` prefix is optional
    pub fn parse(model_id: &str) -> Result<Self, TtsError> {
        let repo = model_id.rsplit('/').next().unwrap_or(model_id);
        let key = repo.strip_prefix(REPO_PREFIX).unwrap_or(repo);
        let parts: Vec<&str> = key.split('-').collect();
        let [language_region, name, quality] = parts.as_slice() else {
            return Err(TtsError::InvalidVoiceName(model_id.to_string()));
        };
        if language_region.is_empty() || name.is_empty() {
            return Err(TtsError::InvalidVoiceName(model_id.to_string()));
        }
        Ok(Self {
            language_region: language_region.to_string(),
            name: name.to_string(),
            quality: quality.parse()?,
        })
    }
}

/// Attach voice details to base metadata. Piper repos carry exactly one language.
fn speech_model(metadata: ModelMetadata) -> Option<SpeechModel> {
    let voice = match PiperVoiceName::parse(&metadata.id) {
        Ok(voice) => voice,
        Err(e) => {
            debug!("Skipping {}: {}", metadata.id, e);
            return None;
        }
    };
    let [language] = metadata.language.as_slice() else {
        debug!(
            "Skipping {}: expected one language, found {:?}",
            metadata.id, metadata.language
        );
        return None;
    };
    let voices = vec![Voice {
        name: voice.name,
        language: language.clone(),
    }];
    Some(SpeechModel {
        metadata,
        sample_rate: voice.quality.sample_rate(),
        voices,
    })
}

/// Piper model files
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PiperFiles {
    pub model: PathBuf,
    pub config: PathBuf,
}

pub struct PiperFamily {
    filter: ModelFilter,
}

impl Default for PiperFamily {
    fn default() -> Self {
        Self {
            filter: ModelFilter::new().library(LIBRARY_NAME).task(TASK).tags(TAGS),
        }
    }
}

impl ModelFamily for PiperFamily {
    type Model = SpeechModel;
    type Files = PiperFiles;

    fn name(&self) -> &'static str {
        "piper"
    }

    fn filter(&self) -> &ModelFilter {
        &self.filter
    }

    fn allow_patterns(&self) -> &[&'static str] {
        ALLOW_PATTERNS
    }

    fn remote_metadata(&self, model: &RemoteModel) -> Option<SpeechModel> {
        speech_model(model.metadata(TASK)?)
    }

    fn local_metadata(&self, repo: &CachedRepo, card: &ModelCard) -> Option<SpeechModel> {
        speech_model(repo.metadata(card, TASK))
    }

    fn resolve_files(&self, model_id: &str, files: &[PathBuf]) -> Result<PiperFiles, ModelError> {
        Ok(PiperFiles {
            model: require_file(files, model_id, "model.onnx")?,
            config: require_file(files, model_id, "config.json")?,
        })
    }
}

/// Voice `config.json` written by the Piper trainer
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PiperConfig {
    pub audio: AudioConfig,
    pub espeak: EspeakConfig,
    pub inference: InferenceConfig,
    pub num_speakers: u32,
    pub speaker_id_map: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub quality: Option<VoiceQuality>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 22050,
            quality: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct EspeakConfig {
    pub voice: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub noise_scale: f32,
    pub length_scale: f32,
    pub noise_w: f32,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            noise_scale: 0.667,
            length_scale: 1.0,
            noise_w: 0.8,
        }
    }
}

/// A loaded Piper voice
#[derive(Debug)]
pub struct PiperModel {
    model_id: String,
    files: PiperFiles,
    weights: MappedWeights,
    config: PiperConfig,
    options: InferenceOptions,
}

impl PiperModel {
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn files(&self) -> &PiperFiles {
        &self.files
    }

    pub fn weights(&self) -> &MappedWeights {
        &self.weights
    }

    pub fn config(&self) -> &PiperConfig {
        &self.config
    }

    pub fn options(&self) -> &InferenceOptions {
        &self.options
    }

    /// Native output sample rate
    pub fn sample_rate(&self) -> u32 {
        self.config.audio.sample_rate
    }

    /// Length scale for a speaking speed multiplier (2.0 = twice as fast)
    pub fn length_scale(&self, speed: f32) -> f32 {
        self.config.inference.length_scale / speed.max(f32::EPSILON)
    }

    /// Speaker id for multi-speaker voices; single-speaker voices accept no name
    pub fn speaker_id(&self, speaker: Option<&str>) -> Result<Option<u32>, TtsError> {
        match speaker {
            None => Ok(None),
            Some(name) => self
                .config
                .speaker_id_map
                .get(name)
                .copied()
                .map(Some)
                .ok_or_else(|| TtsError::UnknownVoice(format!("{} has no speaker {}", self.model_id, name))),
        }
    }
}

pub struct PiperLoader {
    registry: Arc<PiperRegistry>,
    options: InferenceOptions,
}

impl PiperLoader {
    pub fn new(registry: Arc<PiperRegistry>, options: InferenceOptions) -> Self {
        Self { registry, options }
    }
}

impl ModelLoader for PiperLoader {
    type Model = PiperModel;

    fn load(&self, model_id: &str) -> anyhow::Result<PiperModel> {
        let start = Instant::now();
        let files = self.registry.resolve_files(model_id)?;
        let weights = MappedWeights::open(&files.model)
            .with_context(|| format!("failed to map {}", files.model.display()))?;
        let config: PiperConfig = read_json(&files.config)?;

        info!(
            "Loaded Piper voice {} ({} Hz, {} speakers) in {:.2}s",
            model_id,
            config.audio.sample_rate,
            config.num_speakers.max(1),
            start.elapsed().as_secs_f64()
        );
        Ok(PiperModel {
            model_id: model_id.to_string(),
            files,
            weights,
            config,
            options: self.options,
        })
    }
}

/// Registry and manager for Piper voices
pub fn piper_executor(cache: HubCache, catalog: CatalogClient, config: &FamilyConfig) -> PiperExecutor {
    let registry = Arc::new(HubRegistry::new(PiperFamily::default(), cache, catalog));
    let loader = PiperLoader::new(Arc::clone(&registry), config.inference_options());
    FamilyExecutor::new(registry, ModelManager::new(loader, config.ttl))
}
