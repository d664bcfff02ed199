//! Catalog / cache filter for one model family

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use vocalis_core::ModelTask;

use crate::card::ModelCard;

/// Which repos belong to a family
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelFilter {
    /// Required `library_name`
    pub library_name: Option<String>,
    /// Required task, matched against `pipeline_tag` or the tag list
    pub task: Option<ModelTask>,
    /// Tags that must all be present
    pub tags: BTreeSet<String>,
    /// Required repo id prefix, for families whose cards carry no library
    pub model_name: Option<String>,
}

impl ModelFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn library(mut self, library_name: &str) -> Self {
        self.library_name = Some(library_name.to_string());
        self
    }

    pub fn task(mut self, task: ModelTask) -> Self {
        self.task = Some(task);
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn model_name(mut self, prefix: &str) -> Self {
        self.model_name = Some(prefix.to_string());
        self
    }

    /// Whether a repo with this id and card belongs to the family
    pub fn passes(&self, repo_id: &str, card: &ModelCard) -> bool {
        if let Some(prefix) = &self.model_name {
            if !repo_id.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(library) = &self.library_name {
            if card.library_name.as_deref() != Some(library.as_str()) {
                return false;
            }
        }
        if let Some(task) = self.task {
            let tag = task.tag();
            if card.pipeline_tag.as_deref() != Some(tag) && !card.tags.iter().any(|t| t == tag) {
                return false;
            }
        }
        self.tags.iter().all(|wanted| card.tags.contains(wanted))
    }

    /// Query parameters for the catalog listing endpoint
    pub fn query_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(library) = &self.library_name {
            params.push(("library".to_string(), library.clone()));
        }
        if let Some(task) = self.task {
            params.push(("pipeline_tag".to_string(), task.tag().to_string()));
        }
        for tag in &self.tags {
            params.push(("filter".to_string(), tag.clone()));
        }
        if let Some(prefix) = &self.model_name {
            params.push(("search".to_string(), prefix.clone()));
        }
        params
    }
}
