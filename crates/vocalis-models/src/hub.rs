//! Registry over the local hub cache and the remote catalog

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::{future, TryStreamExt};
use tracing::{debug, info, warn};

use crate::cache::{CachedRepo, HubCache};
use crate::card::ModelCard;
use crate::catalog::{CatalogClient, ModelStream};
use crate::download::{download_snapshot, DownloadLocks, DownloadStatus};
use crate::error::ModelError;
use crate::registry::{ModelFamily, ModelRegistry};

/// [`ModelRegistry`] over a hub cache and catalog
pub struct HubRegistry<F: ModelFamily> {
    family: Arc<F>,
    cache: HubCache,
    catalog: CatalogClient,
    locks: DownloadLocks,
}

impl<F: ModelFamily> HubRegistry<F> {
    pub fn new(family: F, cache: HubCache, catalog: CatalogClient) -> Self {
        Self {
            family: Arc::new(family),
            cache,
            catalog,
            locks: DownloadLocks::default(),
        }
    }

    pub fn family(&self) -> &F {
        &self.family
    }

    pub fn cache(&self) -> &HubCache {
        &self.cache
    }

    /// Card of a cached repo, `None` when absent or unreadable
    fn card_of(&self, repo: &CachedRepo) -> Option<ModelCard> {
        let Some(readme) = repo.file("README.md") else {
            debug!("{} has no README.md, skipping", repo.repo_id);
            return None;
        };
        match ModelCard::from_path(&readme) {
            Ok(card) => Some(card),
            Err(e) => {
                warn!("Skipping cached repo {}: {}", repo.repo_id, e);
                None
            }
        }
    }

    fn files(&self, model_id: &str) -> Result<F::Files, ModelError> {
        let files = self.cache.list_files(model_id)?;
        self.family.resolve_files(model_id, &files)
    }

    fn local_entry(&self, repo: &CachedRepo) -> Option<F::Model> {
        let card = self.card_of(repo)?;
        if !self.family.filter().passes(&repo.repo_id, &card) {
            return None;
        }
        self.family.local_metadata(repo, &card)
    }

    async fn download_model_files(&self, model_id: &str) -> Result<PathBuf, ModelError> {
        info!("Downloading {} model {}", self.family.name(), model_id);
        let assets = self.family.auxiliary_assets(model_id);
        download_snapshot(
            &self.catalog,
            &self.cache,
            model_id,
            self.family.allow_patterns(),
            &assets,
        )
        .await
    }
}

impl<F: ModelFamily> ModelRegistry for HubRegistry<F> {
    type Model = F::Model;
    type Files = F::Files;

    fn list_remote_models(&self) -> ModelStream<F::Model> {
        let family = Arc::clone(&self.family);
        let models = self
            .catalog
            .list_models(self.family.filter().query_params())
            .try_filter_map(move |model| {
                let mapped = family.remote_metadata(&model);
                if mapped.is_none() {
                    debug!("Skipping catalog entry {}", model.id);
                }
                future::ready(Ok(mapped))
            });
        Box::pin(models)
    }

    fn list_local_models(&self) -> Vec<F::Model> {
        self.cache
            .repos()
            .filter_map(|repo| self.local_entry(&repo))
            .collect()
    }

    fn get_model(&self, model_id: &str) -> Result<F::Model, ModelError> {
        self.cache
            .repo(model_id)
            .and_then(|repo| self.local_entry(&repo))
            .ok_or_else(|| ModelError::ModelNotFound(model_id.to_string()))
    }

    fn resolve_files(&self, model_id: &str) -> Result<F::Files, ModelError> {
        self.files(model_id)
    }

    async fn download_if_not_exist(&self, model_id: &str) -> Result<DownloadStatus, ModelError> {
        if self.files(model_id).is_ok() {
            return Ok(DownloadStatus::AlreadyPresent);
        }

        let _guard = self.locks.lock(model_id).await;
        // another caller may have finished the download while we waited
        if self.files(model_id).is_ok() {
            return Ok(DownloadStatus::AlreadyPresent);
        }

        let snapshot = self.download_model_files(model_id).await?;
        self.files(model_id).map_err(|e| {
            ModelError::DownloadFailed(format!(
                "{} incomplete after download to {}: {}",
                model_id,
                display(&snapshot),
                e
            ))
        })?;
        Ok(DownloadStatus::Downloaded)
    }

    fn delete_model(&self, model_id: &str) -> Result<(), ModelError> {
        self.cache.delete(model_id)
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use vocalis_core::{ModelMetadata, ModelTask};

    use crate::catalog::RemoteModel;
    use crate::filter::ModelFilter;
    use crate::registry::require_file;

    struct TestFamily {
        filter: ModelFilter,
    }

    #[derive(Debug, Clone)]
    struct TestFiles {
        weights: PathBuf,
    }

    impl ModelFamily for TestFamily {
        type Model = ModelMetadata;
        type Files = TestFiles;

        fn name(&self) -> &'static str {
            "test"
        }

        fn filter(&self) -> &ModelFilter {
            &self.filter
        }

        fn allow_patterns(&self) -> &[&'static str] {
            &["weights.bin", "README.md"]
        }

        fn remote_metadata(&self, model: &RemoteModel) -> Option<ModelMetadata> {
            Some(ModelMetadata::new(
                &model.id,
                model.created(),
                vec![],
                ModelTask::AutomaticSpeechRecognition,
            ))
        }

        fn local_metadata(&self, repo: &CachedRepo, card: &ModelCard) -> Option<ModelMetadata> {
            Some(ModelMetadata::new(
                &repo.repo_id,
                repo.last_modified,
                card.language.clone(),
                ModelTask::AutomaticSpeechRecognition,
            ))
        }

        fn resolve_files(&self, model_id: &str, files: &[PathBuf]) -> Result<TestFiles, ModelError> {
            Ok(TestFiles {
                weights: require_file(files, model_id, "weights.bin")?,
            })
        }
    }

    fn registry(root: &Path) -> HubRegistry<TestFamily> {
        HubRegistry::new(
            TestFamily {
                filter: ModelFilter::new()
                    .library("ctranslate2")
                    .task(ModelTask::AutomaticSpeechRecognition),
            },
            HubCache::new(root),
            CatalogClient::new("http://127.0.0.1:9", None).unwrap(),
        )
    }

    fn cache_repo(root: &Path, model_id: &str, readme: Option<&str>, files: &[&str]) {
        let repo = root.join(crate::cache::repo_folder_name(model_id));
        let snapshot = repo.join("snapshots").join("rev");
        fs::create_dir_all(&snapshot).unwrap();
        fs::create_dir_all(repo.join("refs")).unwrap();
        fs::write(repo.join("refs").join("main"), "rev").unwrap();
        if let Some(readme) = readme {
            fs::write(snapshot.join("README.md"), readme).unwrap();
        }
        for file in files {
            fs::write(snapshot.join(file), b"x").unwrap();
        }
    }

    const ASR_CARD: &str = "---\nlibrary_name: ctranslate2\npipeline_tag: automatic-speech-recognition\nlanguage: [en]\n---\n";

    #[test]
    fn test_list_local_applies_filter_and_skips_invalid() {
        let dir = tempfile::tempdir().unwrap();
        cache_repo(dir.path(), "org/asr", Some(ASR_CARD), &["weights.bin"]);
        cache_repo(dir.path(), "org/tts", Some("---\nlibrary_name: onnx\n---\n"), &[]);
        cache_repo(dir.path(), "org/no-card", None, &["weights.bin"]);
        cache_repo(dir.path(), "org/broken", Some("---\nlibrary_name: ctranslate2\n"), &[]);

        let registry = registry(dir.path());
        let models = registry.list_local_models();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].id, "org/asr");
        assert_eq!(models[0].language, vec!["en"]);
        assert_eq!(models[0].owned_by, "org");

        assert!(registry.get_model("org/asr").is_ok());
        assert!(registry.get_model("org/tts").unwrap_err().is_not_found());
    }

    #[test]
    fn test_resolve_files() {
        let dir = tempfile::tempdir().unwrap();
        cache_repo(dir.path(), "org/asr", Some(ASR_CARD), &["weights.bin"]);
        cache_repo(dir.path(), "org/partial", Some(ASR_CARD), &[]);
        let registry = registry(dir.path());

        let files = registry.resolve_files("org/asr").unwrap();
        assert!(files.weights.ends_with("snapshots/rev/weights.bin"));
        assert!(registry.resolve_files("org/partial").unwrap_err().is_not_found());
        assert!(registry.resolve_files("org/unknown").unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_download_skipped_when_present() {
        let dir = tempfile::tempdir().unwrap();
        cache_repo(dir.path(), "org/asr", Some(ASR_CARD), &["weights.bin"]);
        // catalog endpoint is unreachable, so any network call would fail
        let status = registry(dir.path()).download_if_not_exist("org/asr").await.unwrap();
        assert_eq!(status, DownloadStatus::AlreadyPresent);
    }

    #[test]
    fn test_delete_model() {
        let dir = tempfile::tempdir().unwrap();
        cache_repo(dir.path(), "org/asr", Some(ASR_CARD), &["weights.bin"]);
        let registry = registry(dir.path());
        registry.delete_model("org/asr").unwrap();
        assert!(registry.list_local_models().is_empty());
        assert!(registry.delete_model("org/asr").unwrap_err().is_not_found());
    }
}
