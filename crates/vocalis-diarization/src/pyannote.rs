//! pyannote.audio diarization pipelines
//!
//! A pipeline repo carries `config.yaml`, which names the segmentation and
//! embedding models it runs. Those are separate hub repos; they are looked up
//! in the same cache when the pipeline loads.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use serde::Serialize;
use tracing::{debug, info, warn};
use vocalis_core::{FamilyConfig, InferenceOptions, ModelLoader, ModelManager, ModelMetadata, ModelTask};
use vocalis_models::{
    find_file, require_file, CachedRepo, CatalogClient, FamilyExecutor, HubCache, HubRegistry,
    MappedWeights, ModelCard, ModelError, ModelFamily, ModelFilter, ModelRegistry, RemoteModel,
};

use crate::error::DiarizationError;
use crate::pipeline::PipelineConfig;

pub const LIBRARY_NAME: &str = "pyannote-audio";
const TASK: ModelTask = ModelTask::SpeakerDiarization;
const CONFIG_FILE: &str = "config.yaml";
const WEIGHTS_FILE: &str = "pytorch_model.bin";

const ALLOW_PATTERNS: &[&str] = &[CONFIG_FILE, WEIGHTS_FILE, "README.md"];

pub type PyannoteRegistry = HubRegistry<PyannoteFamily>;
pub type PyannoteExecutor = FamilyExecutor<PyannoteRegistry, PyannoteLoader>;

/// Pipeline files
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PyannoteFiles {
    pub config: PathBuf,
    /// Present when the repo is a single model rather than a pipeline
    pub weights: Option<PathBuf>,
}

pub struct PyannoteFamily {
    filter: ModelFilter,
}

impl Default for PyannoteFamily {
    fn default() -> Self {
        Self {
            filter: ModelFilter::new().library(LIBRARY_NAME).task(TASK),
        }
    }
}

impl ModelFamily for PyannoteFamily {
    type Model = ModelMetadata;
    type Files = PyannoteFiles;

    fn name(&self) -> &'static str {
        "pyannote"
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

    fn resolve_files(&self, model_id: &str, files: &[PathBuf]) -> Result<PyannoteFiles, ModelError> {
        Ok(PyannoteFiles {
            config: require_file(files, model_id, CONFIG_FILE)?,
            weights: find_file(files, WEIGHTS_FILE),
        })
    }
}

/// A model a pipeline runs internally
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineDependency {
    /// `segmentation` or `embedding`
    pub role: &'static str,
    /// Hub id or path as written in `config.yaml`
    pub model_id: String,
    /// Resolved weights, `None` when not in the cache
    pub weights: Option<PathBuf>,
}

impl PipelineDependency {
    fn resolve(role: &'static str, reference: &str, snapshot: &Path, cache: &HubCache) -> Self {
        let weights = if is_path_reference(reference) {
            let path = snapshot.join(reference);
            path.is_file().then_some(path)
        } else {
            cache
                .list_files(reference)
                .ok()
                .and_then(|files| find_file(&files, WEIGHTS_FILE))
        };

        if weights.is_none() {
            warn!("Pipeline {} model {} is not cached", role, reference);
        }
        Self {
            role,
            model_id: reference.to_string(),
            weights,
        }
    }
}

fn is_path_reference(reference: &str) -> bool {
    reference.starts_with('.') || reference.starts_with('/') || reference.ends_with(".bin")
}

/// A loaded pyannote pipeline
#[derive(Debug)]
pub struct PyannoteModel {
    model_id: String,
    files: PyannoteFiles,
    pipeline: PipelineConfig,
    weights: Option<MappedWeights>,
    dependencies: Vec<PipelineDependency>,
    options: InferenceOptions,
}

impl PyannoteModel {
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn files(&self) -> &PyannoteFiles {
        &self.files
    }

    pub fn pipeline(&self) -> &PipelineConfig {
        &self.pipeline
    }

    pub fn weights(&self) -> Option<&MappedWeights> {
        self.weights.as_ref()
    }

    pub fn dependencies(&self) -> &[PipelineDependency] {
        &self.dependencies
    }

    pub fn options(&self) -> &InferenceOptions {
        &self.options
    }

    /// Fails on the first dependency whose weights are not cached
    pub fn require_dependencies(&self) -> Result<(), DiarizationError> {
        match self.dependencies.iter().find(|d| d.weights.is_none()) {
            Some(dep) => Err(DiarizationError::MissingDependency(format!(
                "{} model {} for {}",
                dep.role, dep.model_id, self.model_id
            ))),
            None => Ok(()),
        }
    }
}

/// Builds [`PyannoteModel`]s from cached files
pub struct PyannoteLoader {
    registry: Arc<PyannoteRegistry>,
    options: InferenceOptions,
}

impl PyannoteLoader {
    pub fn new(registry: Arc<PyannoteRegistry>, options: InferenceOptions) -> Self {
        Self { registry, options }
    }
}

impl ModelLoader for PyannoteLoader {
    type Model = PyannoteModel;

    fn load(&self, model_id: &str) -> anyhow::Result<PyannoteModel> {
        let start = Instant::now();
        let files = self.registry.resolve_files(model_id)?;
        debug!("Pyannote files for {}: {:?}", model_id, files);

        let text = fs::read_to_string(&files.config)
            .with_context(|| format!("failed to read {}", files.config.display()))?;
        let pipeline = PipelineConfig::parse(&text)?;

        let weights = files
            .weights
            .as_deref()
            .map(MappedWeights::open)
            .transpose()?;

        let snapshot = files.config.parent().unwrap_or(Path::new("."));
        let cache = self.registry.cache();
        let dependencies: Vec<_> = [
            ("segmentation", pipeline.segmentation.as_deref()),
            ("embedding", pipeline.embedding.as_deref()),
        ]
        .into_iter()
        .filter_map(|(role, reference)| {
            reference.map(|r| PipelineDependency::resolve(role, r, snapshot, cache))
        })
        .collect();

        info!(
            "Loaded pyannote pipeline {} ({}, {} dependencies, on {}) in {:.2}s",
            model_id,
            pipeline.name,
            dependencies.len(),
            self.options.device,
            start.elapsed().as_secs_f64()
        );
        Ok(PyannoteModel {
            model_id: model_id.to_string(),
            files,
            pipeline,
            weights,
            dependencies,
            options: self.options,
        })
    }
}

/// Registry and manager for pyannote pipelines
pub fn pyannote_executor(
    cache: HubCache,
    catalog: CatalogClient,
    config: &FamilyConfig,
) -> PyannoteExecutor {
    let registry = Arc::new(HubRegistry::new(PyannoteFamily::default(), cache, catalog));
    let loader = PyannoteLoader::new(Arc::clone(&registry), config.inference_options());
    FamilyExecutor::new(registry, ModelManager::new(loader, config.ttl))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vocalis_core::{Device, LifecycleError, Ttl};

    const PIPELINE_CARD: &str =
        "---\nlibrary_name: pyannote-audio\ntags:\n- pyannote\n- speaker-diarization\nlicense: mit\n---\n";
    const PIPELINE_CONFIG: &str = "version: 3.1.0\n\npipeline:\n  name: pyannote.audio.pipelines.SpeakerDiarization\n  params:\n    embedding: pyannote/wespeaker-voxceleb-resnet34-LM\n    segmentation: pyannote/segmentation-3.0\n\nparams:\n  clustering:\n    threshold: 0.7045654963945799\n";

    fn cache_repo(root: &Path, model_id: &str, files: &[(&str, &str)]) -> PathBuf {
        let repo = root.join(format!("models--{}", model_id.replace('/', "--")));
        let snapshot = repo.join("snapshots").join("0f0a1b2c");
        fs::create_dir_all(&snapshot).unwrap();
        fs::create_dir_all(repo.join("refs")).unwrap();
        fs::write(repo.join("refs").join("main"), "0f0a1b2c").unwrap();
        for (name, content) in files {
            fs::write(snapshot.join(name), content).unwrap();
        }
        snapshot
    }

    fn executor(root: &Path, ttl: Ttl) -> PyannoteExecutor {
        let config = FamilyConfig {
            device: Device::Cpu,
            ttl,
            ..FamilyConfig::default()
        };
        pyannote_executor(
            HubCache::new(root),
            CatalogClient::new("http://127.0.0.1:9", None).unwrap(),
            &config,
        )
    }

    #[test]
    fn test_local_pipelines_by_tag() {
        let dir = tempfile::tempdir().unwrap();
        cache_repo(
            dir.path(),
            "pyannote/speaker-diarization-3.1",
            &[("README.md", PIPELINE_CARD), (CONFIG_FILE, PIPELINE_CONFIG)],
        );
        cache_repo(
            dir.path(),
            "pyannote/segmentation-3.0",
            &[
                ("README.md", "---\nlibrary_name: pyannote-audio\ntags:\n- voice-activity-detection\n---\n"),
                (WEIGHTS_FILE, "seg"),
            ],
        );

        let executor = executor(dir.path(), Ttl::Never);
        let models = executor.list_local();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].id, "pyannote/speaker-diarization-3.1");
        assert_eq!(models[0].task, ModelTask::SpeakerDiarization);
    }

    #[test]
    fn test_weights_are_optional() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = cache_repo(
            dir.path(),
            "pyannote/speaker-diarization-3.1",
            &[("README.md", PIPELINE_CARD), (CONFIG_FILE, PIPELINE_CONFIG)],
        );
        let executor = executor(dir.path(), Ttl::Never);

        let files = executor
            .registry()
            .resolve_files("pyannote/speaker-diarization-3.1")
            .unwrap();
        assert_eq!(files.config, snapshot.join(CONFIG_FILE));
        assert_eq!(files.weights, None);

        fs::remove_file(snapshot.join(CONFIG_FILE)).unwrap();
        assert!(executor
            .registry()
            .resolve_files("pyannote/speaker-diarization-3.1")
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_load_resolves_dependencies() {
        let dir = tempfile::tempdir().unwrap();
        cache_repo(
            dir.path(),
            "pyannote/speaker-diarization-3.1",
            &[("README.md", PIPELINE_CARD), (CONFIG_FILE, PIPELINE_CONFIG)],
        );
        let segmentation = cache_repo(
            dir.path(),
            "pyannote/segmentation-3.0",
            &[(WEIGHTS_FILE, "seg")],
        );
        let executor = executor(dir.path(), Ttl::Never);

        let model = executor.acquire("pyannote/speaker-diarization-3.1").await.unwrap();
        assert_eq!(model.pipeline().name, "pyannote.audio.pipelines.SpeakerDiarization");
        assert!(model.weights().is_none());
        assert_eq!(model.options().device, Device::Cpu);

        let deps = model.dependencies();
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].role, "segmentation");
        assert_eq!(deps[0].weights, Some(segmentation.join(WEIGHTS_FILE)));
        assert_eq!(deps[1].role, "embedding");
        assert_eq!(deps[1].weights, None);

        let err = model.require_dependencies().unwrap_err();
        assert!(matches!(err, DiarizationError::MissingDependency(_)));
        assert!(err.to_string().contains("wespeaker"));
    }

    #[tokio::test]
    async fn test_local_weights_reference() {
        let dir = tempfile::tempdir().unwrap();
        cache_repo(
            dir.path(),
            "acme/diarize",
            &[
                ("README.md", PIPELINE_CARD),
                (
                    CONFIG_FILE,
                    "pipeline:\n  name: custom.Pipeline\n  params:\n    segmentation: ./segmentation.bin\n",
                ),
                ("segmentation.bin", "seg"),
                (WEIGHTS_FILE, "weights"),
            ],
        );
        let executor = executor(dir.path(), Ttl::Immediate);

        let model = executor.acquire("acme/diarize").await.unwrap();
        assert_eq!(model.weights().map(|w| w.as_bytes()), Some(&b"weights"[..]));
        assert!(model.require_dependencies().is_ok());
        executor.release(model);
        assert!(executor.loaded_models().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_pipeline_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        cache_repo(
            dir.path(),
            "acme/broken",
            &[("README.md", PIPELINE_CARD), (CONFIG_FILE, "version: 1\n")],
        );
        let executor = executor(dir.path(), Ttl::Never);

        let err = executor.acquire("acme/broken").await.unwrap_err();
        match err {
            ModelError::Lifecycle(LifecycleError::LoadFailed { reason, .. }) => {
                assert!(reason.contains("pipeline.name"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
