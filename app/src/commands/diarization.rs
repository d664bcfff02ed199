//! Speaker diarization commands

use serde_json::{json, Value};
use tracing::warn;
use vocalis_diarization::PyannoteExecutor;

/// Load a pyannote pipeline and describe it
pub async fn load_pyannote(executor: &PyannoteExecutor, model_id: &str) -> anyhow::Result<Value> {
    let model = executor.acquire(model_id).await?;
    if let Err(e) = model.require_dependencies() {
        warn!("{}", e);
    }
    let pipeline = model.pipeline();
    let info = json!({
        "model_id": model.model_id(),
        "pipeline": pipeline.name,
        "version": pipeline.version,
        "size_bytes": model.weights().map(|w| w.len()),
        "dependencies": model.dependencies(),
        "options": model.options(),
    });
    executor.release(model);
    Ok(info)
}
