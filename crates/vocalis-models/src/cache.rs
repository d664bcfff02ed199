//! Hub-compatible local model cache
//!
//! Layout:
//!
//! ```text
//! {root}/models--{org}--{name}/refs/main            revision hash
//! {root}/models--{org}--{name}/snapshots/{rev}/...  model files
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Instant, UNIX_EPOCH};

use serde::Serialize;
use tracing::{debug, info, warn};
use vocalis_core::{ModelMetadata, ModelTask};
use walkdir::WalkDir;

use crate::card::ModelCard;
use crate::error::ModelError;

const REPO_PREFIX: &str = "models--";
const MAIN_REF: &str = "main";

/// One cached model repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CachedRepo {
    pub repo_id: String,
    pub repo_path: PathBuf,
    /// Snapshot of the `main` ref, or the only snapshot present
    pub snapshot_path: Option<PathBuf>,
    /// Newest file modification time in the repo, unix seconds
    pub last_modified: i64,
}

impl CachedRepo {
    /// Path of a file inside the snapshot, if it exists
    pub fn file(&self, name: &str) -> Option<PathBuf> {
        let path = self.snapshot_path.as_ref()?.join(name);
        path.is_file().then_some(path)
    }

    /// Standard metadata record for this repo
    pub fn metadata(&self, card: &ModelCard, task: ModelTask) -> ModelMetadata {
        ModelMetadata::new(
            self.repo_id.clone(),
            self.last_modified,
            card.language.clone(),
            task,
        )
    }
}

/// Local model cache rooted at one directory
#[derive(Debug, Clone)]
pub struct HubCache {
    root: PathBuf,
}

impl HubCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the cache root if it does not exist yet
    pub fn ensure_root(&self) -> Result<(), ModelError> {
        fs::create_dir_all(&self.root).map_err(|e| {
            ModelError::CacheDirectoryError(format!("{}: {}", self.root.display(), e))
        })
    }

    /// Directory a model id is stored under (whether or not it exists)
    pub fn repo_dir(&self, model_id: &str) -> PathBuf {
        self.root.join(repo_folder_name(model_id))
    }

    /// Cached repo for a model id
    pub fn repo(&self, model_id: &str) -> Option<CachedRepo> {
        let path = self.repo_dir(model_id);
        path.is_dir().then(|| load_repo(model_id.to_string(), path))
    }

    /// All cached model repos. Unrelated entries in the cache root are skipped.
    pub fn repos(&self) -> impl Iterator<Item = CachedRepo> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => Some(entries),
            Err(e) => {
                debug!("Cache directory {} not readable: {}", self.root.display(), e);
                None
            }
        };

        entries.into_iter().flatten().filter_map(|entry| {
            let entry = entry.ok()?;
            let path = entry.path();
            if !path.is_dir() {
                return None;
            }
            let name = entry.file_name();
            let repo_id = model_id_from_folder(name.to_str()?)?;
            Some(load_repo(repo_id, path))
        })
    }

    /// Files in the model's snapshot, relative paths preserved
    pub fn list_files(&self, model_id: &str) -> Result<Vec<PathBuf>, ModelError> {
        let snapshot = self
            .repo(model_id)
            .and_then(|r| r.snapshot_path)
            .ok_or_else(|| ModelError::ModelNotFound(model_id.to_string()))?;

        Ok(WalkDir::new(&snapshot)
            .follow_links(true)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect())
    }

    /// Remove a cached repo
    pub fn delete(&self, model_id: &str) -> Result<(), ModelError> {
        let path = self.repo_dir(model_id);
        if !path.is_dir() {
            return Err(ModelError::ModelNotFound(model_id.to_string()));
        }
        debug!("Deleting model repo: {}", path.display());
        let start = Instant::now();
        fs::remove_dir_all(&path)?;
        info!(
            "Deleted {} in {:.2}s",
            path.display(),
            start.elapsed().as_secs_f64()
        );
        Ok(())
    }
}

/// `org/name` -> `models--org--name`
pub fn repo_folder_name(model_id: &str) -> String {
    format!("{}{}", REPO_PREFIX, model_id.replace('/', "--"))
}

/// `models--org--name` -> `org/name`; `None` for non-model entries
pub fn model_id_from_folder(folder: &str) -> Option<String> {
    let id = folder.strip_prefix(REPO_PREFIX)?;
    if id.is_empty() {
        return None;
    }
    Some(id.replace("--", "/"))
}

/// Read `refs/main` of a repo directory
pub fn read_main_ref(repo_path: &Path) -> Option<String> {
    let rev = fs::read_to_string(repo_path.join("refs").join(MAIN_REF)).ok()?;
    let rev = rev.trim();
    (!rev.is_empty()).then(|| rev.to_string())
}

fn load_repo(repo_id: String, repo_path: PathBuf) -> CachedRepo {
    let snapshot_path = resolve_snapshot(&repo_path);
    if snapshot_path.is_none() {
        warn!("No usable snapshot for cached repo {}", repo_id);
    }
    let last_modified = last_modified(&repo_path);
    CachedRepo {
        repo_id,
        repo_path,
        snapshot_path,
        last_modified,
    }
}

fn resolve_snapshot(repo_path: &Path) -> Option<PathBuf> {
    let snapshots = repo_path.join("snapshots");
    if let Some(rev) = read_main_ref(repo_path) {
        let path = snapshots.join(rev);
        if path.is_dir() {
            return Some(path);
        }
    }

    let mut dirs = fs::read_dir(&snapshots)
        .ok()?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_dir());
    match (dirs.next(), dirs.next()) {
        (Some(only), None) => Some(only),
        _ => None,
    }
}

fn last_modified(repo_path: &Path) -> i64 {
    WalkDir::new(repo_path)
        .into_iter()
        .filter_map(Result::ok)
        .filter_map(|e| e.metadata().ok())
        .filter_map(|m| m.modified().ok())
        .filter_map(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .max()
        .unwrap_or(0)
}
