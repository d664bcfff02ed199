//! Remote model catalog client (Hugging Face Hub API)

use std::pin::Pin;

use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, TryStreamExt};
use reqwest::header::{HeaderMap, AUTHORIZATION, LINK};
use reqwest::{RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;
use vocalis_core::{ModelMetadata, ModelTask};

use crate::card::ModelCard;
use crate::error::ModelError;

/// Boxed stream of catalog records
pub type ModelStream<T> = Pin<Box<dyn Stream<Item = Result<T, ModelError>> + Send>>;

/// One entry of the model listing
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteModel {
    pub id: String,
    pub created_at: Option<DateTime<Utc>>,
    pub card_data: Option<ModelCard>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, rename = "pipeline_tag")]
    pub pipeline_tag: Option<String>,
    #[serde(default, rename = "library_name")]
    pub library_name: Option<String>,
}

impl RemoteModel {
    /// Creation time in unix seconds (0 if unknown)
    pub fn created(&self) -> i64 {
        self.created_at.map(|t| t.timestamp()).unwrap_or(0)
    }

    /// Standard metadata record; `None` without card data or creation time
    pub fn metadata(&self, task: ModelTask) -> Option<ModelMetadata> {
        let card = self.card_data.as_ref()?;
        let created = self.created_at?.timestamp();
        Some(ModelMetadata::new(
            self.id.clone(),
            created,
            card.language.clone(),
            task,
        ))
    }
}

/// LFS details of a repo file
#[derive(Debug, Clone, Deserialize)]
pub struct LfsInfo {
    pub sha256: String,
    pub size: u64,
}

/// A file in a model repo
#[derive(Debug, Clone, Deserialize)]
pub struct Sibling {
    pub rfilename: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub lfs: Option<LfsInfo>,
}

/// Single-model details
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteModelInfo {
    pub id: String,
    /// Commit the `main` ref points at
    pub sha: String,
    #[serde(default)]
    pub siblings: Vec<Sibling>,
}

/// Model catalog HTTP client
#[derive(Clone)]
pub struct CatalogClient {
    endpoint: String,
    client: reqwest::Client,
    token: Option<SecretString>,
}

impl CatalogClient {
    /// Create a client for `endpoint` (e.g. "https://huggingface.co")
    pub fn new(endpoint: &str, token: Option<SecretString>) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("vocalis/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ModelError::DownloadFailed(e.to_string()))?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
            token,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// List models matching `query`, following `Link: rel="next"` pages
    /// lazily. Each call issues a fresh query.
    pub fn list_models(&self, query: Vec<(String, String)>) -> ModelStream<RemoteModel> {
        let client = self.clone();
        let mut first = query;
        first.push(("cardData".to_string(), "true".to_string()));

        let pages = stream::try_unfold(Cursor::Start(first), move |cursor| {
            let client = client.clone();
            async move { client.fetch_page(cursor).await }
        });

        Box::pin(
            pages
                .map_ok(|page| stream::iter(page.into_iter().map(Ok::<_, ModelError>)))
                .try_flatten(),
        )
    }

    async fn fetch_page(
        &self,
        cursor: Cursor,
    ) -> Result<Option<(Vec<RemoteModel>, Cursor)>, ModelError> {
        let request = match cursor {
            Cursor::Start(query) => self
                .get(&format!("{}/api/models", self.endpoint))
                .query(&query),
            Cursor::Next(url) => self.get(&url),
            Cursor::Done => return Ok(None),
        };

        let response = check_status(request.send().await?, "model listing")?;
        let next = next_link(response.headers());
        let page: Vec<RemoteModel> = response.json().await?;
        debug!("Fetched catalog page with {} models", page.len());

        let cursor = next.map(Cursor::Next).unwrap_or(Cursor::Done);
        Ok(Some((page, cursor)))
    }

    /// Details and file list of one model. `ModelNotFound` on 404.
    pub async fn model_info(&self, model_id: &str) -> Result<RemoteModelInfo, ModelError> {
        let url = format!("{}/api/models/{}", self.endpoint, model_id);
        let response = self.get(&url).query(&[("blobs", "true")]).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ModelError::ModelNotFound(model_id.to_string()));
        }
        Ok(check_status(response, model_id)?.json().await?)
    }

    /// URL of one file at a revision
    pub fn resolve_url(&self, model_id: &str, revision: &str, filename: &str) -> String {
        format!("{}/{}/resolve/{}/{}", self.endpoint, model_id, revision, filename)
    }

    /// GET a file, returning the streaming response
    pub async fn fetch(&self, url: &str) -> Result<Response, ModelError> {
        let response = self.get(url).send().await?;
        check_status(response, url)
    }

    /// GET a file hosted outside the catalog. The catalog token is not sent.
    pub async fn fetch_asset(&self, url: &str) -> Result<Response, ModelError> {
        let response = self.client.get(url).send().await?;
        check_status(response, url)
    }

    fn get(&self, url: &str) -> RequestBuilder {
        let request = self.client.get(url);
        match &self.token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {}", token.expose_secret())),
            None => request,
        }
    }
}

enum Cursor {
    Start(Vec<(String, String)>),
    Next(String),
    Done,
}

fn check_status(response: Response, what: &str) -> Result<Response, ModelError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(ModelError::DownloadFailed(format!("{what}: HTTP error: {status}")))
    }
}

/// Extract the `rel="next"` target of a `Link` header
fn next_link(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(LINK)?.to_str().ok()?;
    link.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        let is_next = params
            .split(';')
            .any(|p| matches!(p.trim(), "rel=\"next\"" | "rel=next"));
        if !is_next {
            return None;
        }
        let url = target.trim().strip_prefix('<')?.strip_suffix('>')?;
        Some(url.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_next_link() {
        let mut headers = HeaderMap::new();
        headers.insert(
            LINK,
            HeaderValue::from_static(
                "<https://huggingface.co/api/models?cursor=abc>; rel=\"next\", <https://huggingface.co/api/models>; rel=\"first\"",
            ),
        );
        assert_eq!(
            next_link(&headers).as_deref(),
            Some("https://huggingface.co/api/models?cursor=abc")
        );

        headers.insert(LINK, HeaderValue::from_static("<https://x/api/models>; rel=\"prev\""));
        assert_eq!(next_link(&headers), None);
        assert_eq!(next_link(&HeaderMap::new()), None);
    }

    #[test]
    fn test_remote_model_json() {
        let model: RemoteModel = serde_json::from_str(
            r#"{
                "id": "Systran/faster-whisper-small",
                "createdAt": "2023-11-23T09:00:00.000Z",
                "cardData": {"language": ["en", "de"], "library_name": "ctranslate2"},
                "tags": ["ctranslate2", "audio"],
                "pipeline_tag": "automatic-speech-recognition"
            }"#,
        )
        .unwrap();
        assert_eq!(model.created(), 1700730000);
        let metadata = model.metadata(ModelTask::AutomaticSpeechRecognition).unwrap();
        assert_eq!(metadata.owned_by, "Systran");
        assert_eq!(metadata.language, vec!["en", "de"]);
        assert_eq!(model.pipeline_tag.as_deref(), Some("automatic-speech-recognition"));

        let bare: RemoteModel = serde_json::from_str(r#"{"id": "org/bare"}"#).unwrap();
        assert_eq!(bare.created(), 0);
        assert!(bare.metadata(ModelTask::TextToSpeech).is_none());
    }

    #[test]
    fn test_model_info_json() {
        let info: RemoteModelInfo = serde_json::from_str(
            r#"{
                "id": "org/m",
                "sha": "0123abcd",
                "siblings": [
                    {"rfilename": "README.md", "size": 10},
                    {"rfilename": "model.bin", "size": 4, "lfs": {"sha256": "ff", "size": 4, "pointerSize": 130}}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(info.sha, "0123abcd");
        assert_eq!(info.siblings[1].lfs.as_ref().unwrap().sha256, "ff");
        assert!(info.siblings[0].lfs.is_none());
    }

    #[test]
    fn test_resolve_url() {
        let client = CatalogClient::new("http://127.0.0.1:1/", None).unwrap();
        assert_eq!(
            client.resolve_url("org/m", "main", "config.json"),
            "http://127.0.0.1:1/org/m/resolve/main/config.json"
        );
    }
}
