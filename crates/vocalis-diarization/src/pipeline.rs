//! pyannote pipeline `config.yaml`
//!
//! Only block mappings with scalar values are read, which is all a pipeline
//! config uses. Nested keys are flattened to dotted paths
//! (`pipeline.params.segmentation`).

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::DiarizationError;

/// The parts of a pipeline config needed to run it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineConfig {
    pub version: Option<String>,
    /// Pipeline class, e.g. `pyannote.audio.pipelines.SpeakerDiarization`
    pub name: String,
    /// Segmentation model id or path
    pub segmentation: Option<String>,
    /// Speaker embedding model id or path
    pub embedding: Option<String>,
    /// Every scalar in the file, by dotted path
    pub values: BTreeMap<String, String>,
}

impl PipelineConfig {
    pub fn parse(text: &str) -> Result<Self, DiarizationError> {
        let values = flatten(text)?;
        let name = values
            .get("pipeline.name")
            .cloned()
            .ok_or_else(|| DiarizationError::InvalidPipeline("missing pipeline.name".to_string()))?;

        Ok(Self {
            version: values.get("version").cloned(),
            name,
            segmentation: values.get("pipeline.params.segmentation").cloned(),
            embedding: values.get("pipeline.params.embedding").cloned(),
            values,
        })
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.values.get(path).map(String::as_str)
    }
}

fn flatten(text: &str) -> Result<BTreeMap<String, String>, DiarizationError> {
    let mut values = BTreeMap::new();
    // (indent, key) of the open mappings
    let mut parents: Vec<(usize, String)> = Vec::new();

    for (line_no, raw) in text.lines().enumerate() {
        let line = strip_comment(raw);
        if line.trim().is_empty() || line.trim() == "---" {
            continue;
        }
        let indent = line.len() - line.trim_start().len();
        let content = line.trim();
        let Some((key, value)) = content.split_once(':') else {
            return Err(DiarizationError::InvalidPipeline(format!(
                "line {}: expected `key: value`",
                line_no + 1
            )));
        };

        while parents.last().is_some_and(|(i, _)| *i >= indent) {
            parents.pop();
        }
        let value = value.trim();
        if value.is_empty() {
            parents.push((indent, key.trim().to_string()));
            continue;
        }

        let mut path: Vec<&str> = parents.iter().map(|(_, k)| k.as_str()).collect();
        path.push(key.trim());
        values.insert(path.join("."), unquote(value));
    }
    Ok(values)
}

fn strip_comment(line: &str) -> &str {
    if line.trim_start().starts_with('#') {
        return "";
    }
    match line.find(" #") {
        Some(pos) => &line[..pos],
        None => line,
    }
}

fn unquote(value: &str) -> String {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value)
        .to_string()
}
