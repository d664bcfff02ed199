//! Speech synthesis commands

use serde_json::{json, Value};
use vocalis_tts::{kokoro, KokoroExecutor, PiperExecutor};

/// Load a Piper voice and describe it
pub async fn load_piper(executor: &PiperExecutor, model_id: &str) -> anyhow::Result<Value> {
    let model = executor.acquire(model_id).await?;
    let config = model.config();
    let info = json!({
        "model_id": model.model_id(),
        "size_bytes": model.weights().len(),
        "sample_rate": model.sample_rate(),
        "espeak_voice": config.espeak.voice,
        "num_speakers": config.num_speakers,
        "speakers": config.speaker_id_map.keys().collect::<Vec<_>>(),
        "options": model.options(),
    });
    executor.release(model);
    Ok(info)
}

/// Load a Kokoro model and describe it
pub async fn load_kokoro(executor: &KokoroExecutor, model_id: &str) -> anyhow::Result<Value> {
    let model = executor.acquire(model_id).await?;
    let info = json!({
        "model_id": model.model_id(),
        "size_bytes": model.weights().len(),
        "sample_rate": model.sample_rate(),
        "voices": kokoro::voices(),
        "languages": kokoro::LANGUAGES,
        "options": model.options(),
    });
    executor.release(model);
    Ok(info)
}
