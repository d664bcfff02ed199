//! Model registry contract
//!
//! [`ModelRegistry`] is the discovery contract every model family satisfies.
//! It is implemented once, by [`HubRegistry`](crate::hub::HubRegistry); a
//! family only describes itself through [`ModelFamily`].

use std::path::PathBuf;

use serde::Serialize;

use crate::cache::CachedRepo;
use crate::card::ModelCard;
use crate::catalog::{ModelStream, RemoteModel};
use crate::download::{AuxiliaryAsset, DownloadStatus};
use crate::error::ModelError;
use crate::filter::ModelFilter;

/// Discovery and file resolution for one model family
#[trait_variant::make(ModelRegistry: Send)]
pub trait LocalModelRegistry {
    /// Metadata record
    type Model;
    /// Resolved file manifest
    type Files;

    /// Models offered by the catalog. Lazy, not cached; each call re-queries.
    fn list_remote_models(&self) -> ModelStream<Self::Model>;

    /// Models present in the local cache. Invalid entries are skipped.
    fn list_local_models(&self) -> Vec<Self::Model>;

    /// Metadata of one cached model
    fn get_model(&self, model_id: &str) -> Result<Self::Model, ModelError>;

    /// Locate every file the model needs; `ModelNotFound` if any is missing
    fn resolve_files(&self, model_id: &str) -> Result<Self::Files, ModelError>;

    /// Fetch the model's files unless they already resolve
    async fn download_if_not_exist(&self, model_id: &str) -> Result<DownloadStatus, ModelError>;

    /// Remove the model from the local cache
    fn delete_model(&self, model_id: &str) -> Result<(), ModelError>;
}

/// Family-specific catalog filter, download patterns and metadata mapping
pub trait ModelFamily: Send + Sync + 'static {
    type Model: Serialize + Clone + Send + Sync + 'static;
    type Files: Clone + Send + Sync + 'static;

    fn name(&self) -> &'static str;

    fn filter(&self) -> &ModelFilter;

    /// File name patterns to fetch from the catalog (`*` wildcard)
    fn allow_patterns(&self) -> &[&'static str];

    /// Files fetched from outside the catalog
    fn auxiliary_assets(&self, _model_id: &str) -> Vec<AuxiliaryAsset> {
        Vec::new()
    }

    /// Map a catalog record; `None` skips it
    fn remote_metadata(&self, model: &RemoteModel) -> Option<Self::Model>;

    /// Map a cached repo whose card passed the filter; `None` skips it
    fn local_metadata(&self, repo: &CachedRepo, card: &ModelCard) -> Option<Self::Model>;

    /// Build the manifest from the model's snapshot files
    fn resolve_files(&self, model_id: &str, files: &[PathBuf]) -> Result<Self::Files, ModelError>;
}

/// Find a snapshot file by name
pub fn find_file(files: &[PathBuf], name: &str) -> Option<PathBuf> {
    files
        .iter()
        .find(|p| p.file_name().and_then(|n| n.to_str()) == Some(name))
        .cloned()
}

/// Like [`find_file`], failing with `ModelNotFound`
pub fn require_file(files: &[PathBuf], model_id: &str, name: &str) -> Result<PathBuf, ModelError> {
    find_file(files, name)
        .ok_or_else(|| ModelError::ModelNotFound(format!("{model_id} (missing {name})")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_file_by_name() {
        let files = vec![
            PathBuf::from("/hub/snapshots/rev/onnx/model.onnx"),
            PathBuf::from("/hub/snapshots/rev/config.json"),
        ];
        assert_eq!(
            find_file(&files, "model.onnx"),
            Some(PathBuf::from("/hub/snapshots/rev/onnx/model.onnx"))
        );
        assert_eq!(find_file(&files, "onnx"), None);

        let err = require_file(&files, "org/m", "vocab.txt").unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("vocab.txt"));
    }
}
