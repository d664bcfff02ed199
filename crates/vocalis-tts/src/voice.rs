//! Metadata shared by the synthesis families

use serde::{Deserialize, Serialize};
use vocalis_core::ModelMetadata;

/// A voice offered by a synthesis model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    pub name: String,
    pub language: String,
}

/// Model metadata extended with output format and voices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeechModel {
    #[serde(flatten)]
    pub metadata: ModelMetadata,
    pub sample_rate: u32,
    pub voices: Vec<Voice>,
}

impl SpeechModel {
    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    pub fn voice(&self, name: &str) -> Option<&Voice> {
        self.voices.iter().find(|v| v.name == name)
    }
}
