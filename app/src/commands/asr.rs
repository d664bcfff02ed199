//! Speech recognition commands

use serde_json::{json, Value};
use vocalis_asr::{ParakeetExecutor, WhisperExecutor};

/// Load a Whisper model and describe it
pub async fn load_whisper(executor: &WhisperExecutor, model_id: &str) -> anyhow::Result<Value> {
    let model = executor.acquire(model_id).await?;
    let preprocessor = model.preprocessor();
    let info = json!({
        "model_id": model.model_id(),
        "size_bytes": model.weights().len(),
        "multilingual": model.is_multilingual(),
        "feature_size": preprocessor.feature_size,
        "sampling_rate": preprocessor.sampling_rate,
        "chunk_length": preprocessor.chunk_length,
        "options": model.options(),
    });
    executor.release(model);
    Ok(info)
}

/// Load a Parakeet model and describe it
pub async fn load_parakeet(executor: &ParakeetExecutor, model_id: &str) -> anyhow::Result<Value> {
    let model = executor.acquire(model_id).await?;
    let info = json!({
        "model_id": model.model_id(),
        "size_bytes": model.encoder().len() + model.decoder_joint().len(),
        "model_type": model.config().model_type,
        "vocab_size": model.vocabulary().len(),
        "blank_id": model.vocabulary().blank_id(),
        "options": model.options(),
    });
    executor.release(model);
    Ok(info)
}
