//! Shared type definitions

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LifecycleError;

/// Inference task served by a model family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelTask {
    /// Speech-to-text
    AutomaticSpeechRecognition,
    /// Text-to-speech
    TextToSpeech,
    /// Who spoke when
    SpeakerDiarization,
}

impl ModelTask {
    /// Catalog tag for this task
    pub fn tag(&self) -> &'static str {
        match self {
            ModelTask::AutomaticSpeechRecognition => "automatic-speech-recognition",
            ModelTask::TextToSpeech => "text-to-speech",
            ModelTask::SpeakerDiarization => "speaker-diarization",
        }
    }
}

impl fmt::Display for ModelTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for ModelTask {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "automatic-speech-recognition" => Ok(ModelTask::AutomaticSpeechRecognition),
            "text-to-speech" => Ok(ModelTask::TextToSpeech),
            "speaker-diarization" => Ok(ModelTask::SpeakerDiarization),
            other => Err(LifecycleError::Config(format!("unknown task: {other}"))),
        }
    }
}

/// Description of a model, either from the remote catalog or the local cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Model identifier (e.g. "Systran/faster-whisper-small")
    pub id: String,
    /// Creation (remote) or last modification (local) time, unix seconds
    pub created: i64,
    /// Always "model"
    pub object: String,
    /// Owning namespace
    pub owned_by: String,
    /// Language tags
    pub language: Vec<String>,
    /// Task tag
    pub task: ModelTask,
}

impl ModelMetadata {
    /// Create metadata, deriving `owned_by` from the id namespace
    pub fn new(id: impl Into<String>, created: i64, language: Vec<String>, task: ModelTask) -> Self {
        let id = id.into();
        let owned_by = owner_of(&id).to_string();
        Self {
            id,
            created,
            object: "model".to_string(),
            owned_by,
            language,
            task,
        }
    }
}

/// Namespace part of a model id ("org/name" -> "org")
pub fn owner_of(model_id: &str) -> &str {
    model_id.split('/').next().unwrap_or(model_id)
}

/// Inference device selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cpu,
    Cuda,
    #[default]
    Auto,
}

impl Device {
    /// Resolve `Auto` to a concrete device for this host
    pub fn resolve(&self) -> Device {
        match self {
            Device::Auto => {
                if cuda_available() {
                    Device::Cuda
                } else {
                    Device::Cpu
                }
            }
            other => *other,
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda => write!(f, "cuda"),
            Device::Auto => write!(f, "auto"),
        }
    }
}

impl FromStr for Device {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Device::Cpu),
            "cuda" => Ok(Device::Cuda),
            "auto" => Ok(Device::Auto),
            other => Err(LifecycleError::Config(format!("unknown device: {other}"))),
        }
    }
}

fn cuda_available() -> bool {
    if let Ok(visible) = std::env::var("CUDA_VISIBLE_DEVICES") {
        if visible.trim().is_empty() || visible.trim() == "-1" {
            return false;
        }
    }
    Path::new("/dev/nvidiactl").exists()
}

/// Weight precision / quantization mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantization {
    Int8,
    Int8Float16,
    Int8Bfloat16,
    Int8Float32,
    Int16,
    Float16,
    Bfloat16,
    Float32,
    #[default]
    Default,
}

impl Quantization {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quantization::Int8 => "int8",
            Quantization::Int8Float16 => "int8_float16",
            Quantization::Int8Bfloat16 => "int8_bfloat16",
            Quantization::Int8Float32 => "int8_float32",
            Quantization::Int16 => "int16",
            Quantization::Float16 => "float16",
            Quantization::Bfloat16 => "bfloat16",
            Quantization::Float32 => "float32",
            Quantization::Default => "default",
        }
    }
}

impl fmt::Display for Quantization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quantization {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let q = match s {
            "int8" => Quantization::Int8,
            "int8_float16" => Quantization::Int8Float16,
            "int8_bfloat16" => Quantization::Int8Bfloat16,
            "int8_float32" => Quantization::Int8Float32,
            "int16" => Quantization::Int16,
            "float16" => Quantization::Float16,
            "bfloat16" => Quantization::Bfloat16,
            "float32" => Quantization::Float32,
            "default" => Quantization::Default,
            other => {
                return Err(LifecycleError::Config(format!("unknown compute type: {other}")));
            }
        };
        Ok(q)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_owner() {
        let meta = ModelMetadata::new(
            "Systran/faster-whisper-tiny.en",
            0,
            vec!["en".to_string()],
            ModelTask::AutomaticSpeechRecognition,
        );
        assert_eq!(meta.owned_by, "Systran");
        assert_eq!(meta.object, "model");
    }

    #[test]
    fn test_task_serde() {
        let json = serde_json::to_string(&ModelTask::TextToSpeech).unwrap();
        assert_eq!(json, "\"text-to-speech\"");
        assert_eq!(
            "speaker-diarization".parse::<ModelTask>().unwrap(),
            ModelTask::SpeakerDiarization
        );
    }

    #[test]
    fn test_quantization_parse() {
        assert_eq!("int8_float16".parse::<Quantization>().unwrap(), Quantization::Int8Float16);
        assert_eq!(Quantization::Bfloat16.to_string(), "bfloat16");
        assert!("int4".parse::<Quantization>().is_err());
    }

    #[test]
    fn test_device_resolve_is_concrete() {
        assert_ne!(Device::Auto.resolve(), Device::Auto);
        assert_eq!(Device::Cpu.resolve(), Device::Cpu);
        assert_eq!("CUDA".parse::<Device>().unwrap(), Device::Cuda);
    }
}
