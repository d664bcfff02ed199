//! Registry + manager pair serving one model family

use std::sync::Arc;

use tracing::info;
use vocalis_core::{LifecycleError, LoadedModelInfo, ModelLease, ModelLoader, ModelManager};

use crate::catalog::ModelStream;
use crate::download::DownloadStatus;
use crate::error::ModelError;
use crate::registry::ModelRegistry;

/// Caller-facing surface of one model family
pub struct FamilyExecutor<R, L: ModelLoader> {
    registry: Arc<R>,
    manager: ModelManager<L>,
}

impl<R, L> FamilyExecutor<R, L>
where
    R: ModelRegistry + Send + Sync + 'static,
    L: ModelLoader,
{
    pub fn new(registry: Arc<R>, manager: ModelManager<L>) -> Self {
        Self { registry, manager }
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn manager(&self) -> &ModelManager<L> {
        &self.manager
    }

    /// Lease `model_id`, downloading its files first if they are not cached
    pub async fn acquire(&self, model_id: &str) -> Result<ModelLease<L::Model>, ModelError> {
        if self.registry.download_if_not_exist(model_id).await? == DownloadStatus::Downloaded {
            info!("Fetched {} before first use", model_id);
        }
        Ok(self.manager.acquire(model_id).await?)
    }

    /// Give a lease back; same as dropping it
    pub fn release(&self, lease: ModelLease<L::Model>) {
        lease.release();
    }

    /// Unload now; `Busy` while leased or loading, `NotFound` if not managed
    pub fn unload(&self, model_id: &str) -> Result<(), ModelError> {
        Ok(self.manager.unload_model(model_id)?)
    }

    pub fn list_local(&self) -> Vec<R::Model> {
        self.registry.list_local_models()
    }

    pub fn list_remote(&self) -> ModelStream<R::Model> {
        self.registry.list_remote_models()
    }

    pub fn get_model(&self, model_id: &str) -> Result<R::Model, ModelError> {
        self.registry.get_model(model_id)
    }

    pub async fn download_if_not_exist(&self, model_id: &str) -> Result<DownloadStatus, ModelError> {
        self.registry.download_if_not_exist(model_id).await
    }

    /// Remove a model from the cache, unloading it first if it is idle
    pub fn delete(&self, model_id: &str) -> Result<(), ModelError> {
        match self.manager.unload_model(model_id) {
            Ok(()) | Err(LifecycleError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        self.registry.delete_model(model_id)
    }

    /// Models currently held by the manager
    pub fn loaded_models(&self) -> Vec<LoadedModelInfo> {
        self.manager.loaded_models()
    }

    /// Unload every idle model; returns the ids still in use
    pub fn shutdown(&self) -> Vec<String> {
        self.manager.shutdown()
    }
}
