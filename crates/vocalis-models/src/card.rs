//! Model card metadata
//!
//! The catalog returns card data as JSON; cached repos carry it as the YAML
//! front matter of `README.md`. Only the flat keys used for filtering are
//! read from the front matter, nested sections are skipped.

use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ModelError;

/// Filterable card fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelCard {
    pub library_name: Option<String>,
    pub pipeline_tag: Option<String>,
    #[serde(deserialize_with = "one_or_many")]
    pub tags: Vec<String>,
    #[serde(deserialize_with = "one_or_many")]
    pub language: Vec<String>,
}

impl ModelCard {
    /// Read the front matter of a README file
    pub fn from_path(path: &Path) -> Result<Self, ModelError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text).map_err(|e| match e {
            ModelError::InvalidModelCard(reason) => {
                ModelError::InvalidModelCard(format!("{}: {}", path.display(), reason))
            }
            other => other,
        })
    }

    /// Parse README text. A README without front matter yields an empty card.
    pub fn parse(text: &str) -> Result<Self, ModelError> {
        let mut lines = text.trim_start_matches('\u{feff}').lines();
        match lines.by_ref().find(|l| !l.trim().is_empty()) {
            Some(first) if first.trim_end() == "---" => {}
            _ => return Ok(ModelCard::default()),
        }

        let mut card = ModelCard::default();
        let mut list_key: Option<String> = None;
        let mut closed = false;

        for line in lines {
            if line.trim_end() == "---" {
                closed = true;
                break;
            }
            let content = strip_comment(line);
            if content.trim().is_empty() {
                continue;
            }

            if line.starts_with([' ', '\t', '-']) {
                let item = content.trim();
                if let (Some(key), Some(value)) = (&list_key, item.strip_prefix('-')) {
                    card.push(key, unquote(value.trim()));
                }
                continue;
            }

            let (key, value) = content
                .split_once(':')
                .ok_or_else(|| ModelError::InvalidModelCard(format!("unexpected line: {line}")))?;
            let key = key.trim();
            let value = value.trim();
            list_key = None;

            if value.is_empty() {
                list_key = Some(key.to_string());
            } else if let Some(inner) = value.strip_prefix('[').and_then(|v| v.strip_suffix(']')) {
                for item in inner.split(',').map(str::trim).filter(|i| !i.is_empty()) {
                    card.push(key, unquote(item));
                }
            } else {
                card.set(key, unquote(value));
            }
        }

        if !closed {
            return Err(ModelError::InvalidModelCard(
                "front matter is not terminated".to_string(),
            ));
        }
        Ok(card)
    }

    fn set(&mut self, key: &str, value: String) {
        match key {
            "library_name" => self.library_name = Some(value),
            "pipeline_tag" => self.pipeline_tag = Some(value),
            "tags" => self.tags = vec![value],
            "language" => self.language = vec![value],
            _ => {}
        }
    }

    fn push(&mut self, key: &str, value: String) {
        match key {
            "tags" => self.tags.push(value),
            "language" => self.language.push(value),
            _ => {}
        }
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find(" #") {
        Some(idx) => &line[..idx],
        None if line.trim_start().starts_with('#') => "",
        None => line,
    }
}

fn unquote(value: &str) -> String {
    let v = value.trim();
    let stripped = v
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| v.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')));
    stripped.unwrap_or(v).to_string()
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(v)) => vec![v],
        Some(OneOrMany::Many(v)) => v,
        None => Vec::new(),
    })
}
