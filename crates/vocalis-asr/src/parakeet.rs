//! Parakeet TDT models exported to ONNX (NeMo Conformer TDT)

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

/// Parakeet cards carry no library name, so repos are matched by id prefix
pub const MODEL_NAME_PREFIX: &str = "istupakov/parakeet-tdt";
const TASK: ModelTask = ModelTask::AutomaticSpeechRecognition;

const ALLOW_PATTERNS: &[&str] = &[
    "encoder-model.onnx",
    "encoder-model.onnx.data",
    "decoder_joint-model.onnx",
    "vocab.txt",
    "config.json",
    "README.md",
];

/// Word boundary marker in SentencePiece vocabularies
const WORD_BOUNDARY: char = '\u{2581}';

pub type ParakeetRegistry = HubRegistry<ParakeetFamily>;
pub type ParakeetExecutor = FamilyExecutor<ParakeetRegistry, ParakeetLoader>;

/// Parakeet model files
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParakeetFiles {
    pub encoder: PathBuf,
    pub decoder_joint: PathBuf,
    pub vocab: PathBuf,
    pub config: PathBuf,
}

pub struct ParakeetFamily {
    filter: ModelFilter,
}

impl Default for ParakeetFamily {
    fn default() -> Self {
        Self {
            filter: ModelFilter::new().model_name(MODEL_NAME_PREFIX).task(TASK),
        }
    }
}

impl ModelFamily for ParakeetFamily {
    type Model = ModelMetadata;
    type Files = ParakeetFiles;

    fn name(&self) -> &'static str {
        "parakeet"
    }

    fn filter(&self) -> &ModelFilter {
        &self.filter
    }

    fn allow_patterns(&self) -> &[&'static str] {
        ALLOW_PATTERNS
    }

    fn remote_metadata(&self, model: &RemoteModel) -> Option<ModelMetadata> {
        // the catalog search is a substring match
        if !model.id.starts_with(MODEL_NAME_PREFIX) {
            return None;
        }
        model.metadata(TASK)
    }

    fn local_metadata(&self, repo: &CachedRepo, card: &ModelCard) -> Option<ModelMetadata> {
        Some(repo.metadata(card, TASK))
    }

    fn resolve_files(&self, model_id: &str, files: &[PathBuf]) -> Result<ParakeetFiles, ModelError> {
        Ok(ParakeetFiles {
            encoder: require_file(files, model_id, "encoder-model.onnx")?,
            decoder_joint: require_file(files, model_id, "decoder_joint-model.onnx")?,
            vocab: require_file(files, model_id, "vocab.txt")?,
            config: require_file(files, model_id, "config.json")?,
        })
    }
}

/// `config.json` of an exported model
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ParakeetConfig {
    pub model_type: String,
    pub features_size: u32,
    pub subsampling_factor: u32,
    pub max_tokens_per_step: u32,
}

impl Default for ParakeetConfig {
    fn default() -> Self {
        Self {
            model_type: "nemo-conformer-tdt".to_string(),
            features_size: 128,
            subsampling_factor: 8,
            max_tokens_per_step: 10,
        }
    }
}

/// Token table from `vocab.txt` (`<token> <id>` per line)
#[derive(Debug, Clone)]
pub struct Vocabulary {
    tokens: Vec<String>,
    blank_id: usize,
}

impl Vocabulary {
    pub fn parse(text: &str) -> Result<Self, AsrError> {
        let mut entries = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let (token, id) = line
                .rsplit_once(' ')
                .ok_or_else(|| AsrError::InvalidVocabulary(format!("line {}: {line}", line_no + 1)))?;
            let id: usize = id.trim().parse().map_err(|_| {
                AsrError::InvalidVocabulary(format!("line {}: bad id {id}", line_no + 1))
            })?;
            entries.push((id, token.to_string()));
        }
        if entries.is_empty() {
            return Err(AsrError::InvalidVocabulary("empty vocabulary".to_string()));
        }

        entries.sort_by_key(|(id, _)| *id);
        let mut tokens = Vec::with_capacity(entries.len());
        for (expected, (id, token)) in entries.into_iter().enumerate() {
            if id != expected {
                return Err(AsrError::InvalidVocabulary(format!(
                    "ids are not contiguous at {expected}"
                )));
            }
            tokens.push(token);
        }

        let blank_id = tokens
            .iter()
            .position(|t| t == "<blk>")
            .unwrap_or(tokens.len() - 1);
        Ok(Self { tokens, blank_id })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn blank_id(&self) -> usize {
        self.blank_id
    }

    pub fn token(&self, id: usize) -> Option<&str> {
        self.tokens.get(id).map(String::as_str)
    }

    /// Join token ids into text, skipping blanks and unknown ids
    pub fn decode(&self, ids: &[usize]) -> String {
        let text: String = ids
            .iter()
            .filter(|&&id| id != self.blank_id)
            .filter_map(|&id| self.token(id))
            .collect();
        text.replace(WORD_BOUNDARY, " ").trim().to_string()
    }
}

/// A loaded Parakeet model
#[derive(Debug)]
pub struct ParakeetModel {
    model_id: String,
    files: ParakeetFiles,
    encoder: MappedWeights,
    decoder_joint: MappedWeights,
    vocabulary: Vocabulary,
    config: ParakeetConfig,
    options: InferenceOptions,
}

impl ParakeetModel {
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn files(&self) -> &ParakeetFiles {
        &self.files
    }

    pub fn encoder(&self) -> &MappedWeights {
        &self.encoder
    }

    pub fn decoder_joint(&self) -> &MappedWeights {
        &self.decoder_joint
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    pub fn config(&self) -> &ParakeetConfig {
        &self.config
    }

    pub fn options(&self) -> &InferenceOptions {
        &self.options
    }
}

pub struct ParakeetLoader {
    registry: Arc<ParakeetRegistry>,
    options: InferenceOptions,
}

impl ParakeetLoader {
    pub fn new(registry: Arc<ParakeetRegistry>, options: InferenceOptions) -> Self {
        Self { registry, options }
    }
}

impl ModelLoader for ParakeetLoader {
    type Model = ParakeetModel;

    fn load(&self, model_id: &str) -> anyhow::Result<ParakeetModel> {
        let start = Instant::now();
        let files = self.registry.resolve_files(model_id)?;
        debug!("Parakeet files for {}: {:?}", model_id, files);

        let encoder = MappedWeights::open(&files.encoder)
            .with_context(|| format!("failed to map {}", files.encoder.display()))?;
        let decoder_joint = MappedWeights::open(&files.decoder_joint)
            .with_context(|| format!("failed to map {}", files.decoder_joint.display()))?;
        let vocab_text = std::fs::read_to_string(&files.vocab)
            .with_context(|| format!("failed to read {}", files.vocab.display()))?;
        let vocabulary = Vocabulary::parse(&vocab_text)?;
        let config: ParakeetConfig = read_json(&files.config)?;

        info!(
            "Loaded Parakeet model {} ({} tokens, {} threads on {}) in {:.2}s",
            model_id,
            vocabulary.len(),
            self.options.cpu_threads,
            self.options.device,
            start.elapsed().as_secs_f64()
        );
        Ok(ParakeetModel {
            model_id: model_id.to_string(),
            files,
            encoder,
            decoder_joint,
            vocabulary,
            config,
            options: self.options,
        })
    }
}

/// Registry and manager for Parakeet models
pub fn parakeet_executor(
    cache: HubCache,
    catalog: CatalogClient,
    config: &FamilyConfig,
) -> ParakeetExecutor {
    let registry = Arc::new(HubRegistry::new(ParakeetFamily::default(), cache, catalog));
    let loader = ParakeetLoader::new(Arc::clone(&registry), config.inference_options());
    FamilyExecutor::new(registry, ModelManager::new(loader, config.ttl))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use std::time::Duration;
    use vocalis_core::{ModelState, Ttl};

    const CARD: &str = "---\nlicense: cc-by-4.0\nlanguage:\n- en\npipeline_tag: automatic-speech-recognition\ntags:\n- nemo\n---\n";
    const VOCAB: &str = "<unk> 0\n\u{2581}hello 1\n\u{2581}wor 2\nld 3\n<blk> 4\n";

    fn cache_repo(root: &Path, model_id: &str, files: &[(&str, &str)]) {
        let repo = root.join(format!("models--{}", model_id.replace('/', "--")));
        let snapshot = repo.join("snapshots").join("f00d");
        fs::create_dir_all(&snapshot).unwrap();
        fs::create_dir_all(repo.join("refs")).unwrap();
        fs::write(repo.join("refs").join("main"), "f00d").unwrap();
        fs::write(snapshot.join("README.md"), CARD).unwrap();
        for (name, content) in files {
            fs::write(snapshot.join(name), content).unwrap();
        }
    }

    fn full_model(root: &Path, model_id: &str) {
        cache_repo(
            root,
            model_id,
            &[
                ("encoder-model.onnx", "encoder"),
                ("decoder_joint-model.onnx", "decoder"),
                ("vocab.txt", VOCAB),
                ("config.json", r#"{"model_type": "nemo-conformer-tdt", "features_size": 80}"#),
            ],
        );
    }

    fn executor(root: &Path, ttl: Ttl) -> ParakeetExecutor {
        parakeet_executor(
            HubCache::new(root),
            CatalogClient::new("http://127.0.0.1:9", None).unwrap(),
            &FamilyConfig {
                ttl,
                ..FamilyConfig::default()
            },
        )
    }

    #[test]
    fn test_vocabulary() {
        let vocab = Vocabulary::parse(VOCAB).unwrap();
        assert_eq!(vocab.len(), 5);
        assert_eq!(vocab.blank_id(), 4);
        assert_eq!(vocab.token(1), Some("\u{2581}hello"));
        assert_eq!(vocab.decode(&[1, 4, 2, 3, 4]), "hello world");

        assert!(Vocabulary::parse("").is_err());
        assert!(Vocabulary::parse("a 0\nb 2\n").is_err());
        assert!(Vocabulary::parse("a zero\n").is_err());
    }

    #[test]
    fn test_local_models_match_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        full_model(dir.path(), "istupakov/parakeet-tdt-0.6b-v2-onnx");
        full_model(dir.path(), "nvidia/parakeet-tdt-0.6b-v2");

        let models = executor(dir.path(), Ttl::Never).list_local();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].id, "istupakov/parakeet-tdt-0.6b-v2-onnx");
        assert_eq!(models[0].owned_by, "istupakov");
        assert_eq!(models[0].language, vec!["en"]);
    }

    #[test]
    fn test_remote_entries_outside_prefix_skipped() {
        let family = ParakeetFamily::default();
        let model: RemoteModel = serde_json::from_str(
            r#"{"id": "someone/istupakov-parakeet-tdt-copy", "createdAt": "2025-01-01T00:00:00Z", "cardData": {}}"#,
        )
        .unwrap();
        assert!(family.remote_metadata(&model).is_none());

        let model: RemoteModel = serde_json::from_str(
            r#"{"id": "istupakov/parakeet-tdt-0.6b-v3-onnx", "createdAt": "2025-01-01T00:00:00Z", "cardData": {"language": "en"}}"#,
        )
        .unwrap();
        let metadata = family.remote_metadata(&model).unwrap();
        assert_eq!(metadata.created, 1735689600);
        assert_eq!(metadata.language, vec!["en"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_model_evicted() {
        let dir = tempfile::tempdir().unwrap();
        full_model(dir.path(), "istupakov/parakeet-tdt-0.6b-v2-onnx");
        let executor = executor(dir.path(), Ttl::After(Duration::from_secs(2)));

        let model = executor
            .acquire("istupakov/parakeet-tdt-0.6b-v2-onnx")
            .await
            .unwrap();
        assert_eq!(model.encoder().as_bytes(), b"encoder");
        assert_eq!(model.config().features_size, 80);
        assert_eq!(model.config().subsampling_factor, 8);
        assert_eq!(model.vocabulary().blank_id(), 4);
        drop(model);

        let loaded = executor.loaded_models();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].state, ModelState::Loaded);
        assert_eq!(loaded[0].use_count, 0);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(executor.loaded_models().is_empty());
    }

    #[test]
    fn test_missing_vocab_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        cache_repo(
            dir.path(),
            "istupakov/parakeet-tdt-0.6b-v2-onnx",
            &[
                ("encoder-model.onnx", "encoder"),
                ("decoder_joint-model.onnx", "decoder"),
                ("config.json", "{}"),
            ],
        );
        let executor = executor(dir.path(), Ttl::Never);
        let err = executor
            .registry()
            .resolve_files("istupakov/parakeet-tdt-0.6b-v2-onnx")
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("vocab.txt"));
    }
}
