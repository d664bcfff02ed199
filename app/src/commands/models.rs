//! Model management commands shared by every family

use futures::StreamExt;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use vocalis_core::ModelLoader;
use vocalis_models::{FamilyExecutor, ModelRegistry};

/// Upper bound on entries printed by `list-remote`
pub const REMOTE_LIST_LIMIT: usize = 100;

/// List models in the local cache
pub fn list_local<R, L>(executor: &FamilyExecutor<R, L>) -> anyhow::Result<Value>
where
    R: ModelRegistry + Send + Sync + 'static,
    R::Model: Serialize,
    L: ModelLoader,
{
    Ok(serde_json::to_value(executor.list_local())?)
}

/// List models from the catalog. Pages are fetched until `limit` entries are read.
pub async fn list_remote<R, L>(executor: &FamilyExecutor<R, L>, limit: usize) -> anyhow::Result<Value>
where
    R: ModelRegistry + Send + Sync + 'static,
    R::Model: Serialize,
    L: ModelLoader,
{
    let mut stream = executor.list_remote().take(limit);
    let mut models = Vec::new();
    while let Some(model) = stream.next().await {
        match model {
            Ok(model) => models.push(serde_json::to_value(model)?),
            Err(e) if models.is_empty() => return Err(e.into()),
            Err(e) => {
                warn!("Remote listing stopped early: {}", e);
                break;
            }
        }
    }
    Ok(Value::Array(models))
}

/// Get metadata of a cached model
pub fn get_model<R, L>(executor: &FamilyExecutor<R, L>, model_id: &str) -> anyhow::Result<Value>
where
    R: ModelRegistry + Send + Sync + 'static,
    R::Model: Serialize,
    L: ModelLoader,
{
    Ok(serde_json::to_value(executor.get_model(model_id)?)?)
}

/// Download a model unless it is already cached
pub async fn download_model<R, L>(executor: &FamilyExecutor<R, L>, model_id: &str) -> anyhow::Result<Value>
where
    R: ModelRegistry + Send + Sync + 'static,
    L: ModelLoader,
{
    let status = executor.download_if_not_exist(model_id).await?;
    Ok(json!({ "model_id": model_id, "status": status }))
}

/// Delete a cached model
pub fn delete_model<R, L>(executor: &FamilyExecutor<R, L>, model_id: &str) -> anyhow::Result<Value>
where
    R: ModelRegistry + Send + Sync + 'static,
    L: ModelLoader,
{
    executor.delete(model_id)?;
    info!("Deleted model {}", model_id);
    Ok(json!({ "model_id": model_id, "deleted": true }))
}

/// Unload a model that is not in use
pub fn unload_model<R, L>(executor: &FamilyExecutor<R, L>, model_id: &str) -> anyhow::Result<Value>
where
    R: ModelRegistry + Send + Sync + 'static,
    L: ModelLoader,
{
    executor.unload(model_id)?;
    Ok(json!({ "model_id": model_id, "unloaded": true }))
}

/// Models currently held by the family's manager
pub fn status<R, L>(executor: &FamilyExecutor<R, L>) -> anyhow::Result<Value>
where
    R: ModelRegistry + Send + Sync + 'static,
    L: ModelLoader,
{
    Ok(json!({
        "ttl": executor.manager().ttl().to_string(),
        "models": executor.loaded_models(),
    }))
}
