//! Snapshot downloads into the hub cache
//!
//! Files are streamed into a staging directory next to the cache repos and
//! only moved into `snapshots/{rev}` once every file (and its checksum, when
//! the catalog reports one) is complete. A failed download removes the
//! staging directory, so readers never observe a partial file set.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::Response;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::cache::HubCache;
use crate::catalog::CatalogClient;
use crate::error::ModelError;

/// Top-level cache folder holding in-progress downloads
pub const STAGING_DIR: &str = ".staging";

/// Outcome of `download_if_not_exist`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    Downloaded,
    AlreadyPresent,
}

/// A file fetched from outside the catalog and stored beside the model files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxiliaryAsset {
    /// Name inside the snapshot
    pub filename: String,
    pub url: String,
}

/// One async lock per model id
#[derive(Default)]
pub struct DownloadLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl DownloadLocks {
    pub async fn lock(&self, model_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(model_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}

/// Glob match supporting `*` (any run of characters)
pub fn matches_pattern(pattern: &str, name: &str) -> bool {
    fn go(p: &[u8], n: &[u8]) -> bool {
        match p.split_first() {
            None => n.is_empty(),
            Some((b'*', rest)) => (0..=n.len()).any(|i| go(rest, &n[i..])),
            Some((c, rest)) => n.split_first().is_some_and(|(h, tail)| h == c && go(rest, tail)),
        }
    }
    go(pattern.as_bytes(), name.as_bytes())
}

/// Fetch the files of `model_id` matching `patterns`, plus `assets`, into
/// the cache snapshot of the current catalog revision
pub async fn download_snapshot(
    catalog: &CatalogClient,
    cache: &HubCache,
    model_id: &str,
    patterns: &[&str],
    assets: &[AuxiliaryAsset],
) -> Result<PathBuf, ModelError> {
    let start = Instant::now();
    let info = catalog.model_info(model_id).await?;
    let selected: Vec<_> = info
        .siblings
        .iter()
        .filter(|s| patterns.iter().any(|p| matches_pattern(p, &s.rfilename)))
        .collect();
    if selected.is_empty() {
        return Err(ModelError::ModelNotFound(format!(
            "{model_id} has no files matching {patterns:?}"
        )));
    }

    let staging = cache
        .root()
        .join(STAGING_DIR)
        .join(Uuid::new_v4().to_string());
    fs::create_dir_all(&staging).await?;
    debug!("Staging {} in {}", model_id, staging.display());

    let result = async {
        for sibling in &selected {
            let dest = staged_path(&staging, &sibling.rfilename)?;
            let url = catalog.resolve_url(model_id, &info.sha, &sibling.rfilename);
            let expected = sibling.lfs.as_ref().map(|lfs| lfs.sha256.as_str());
            let bytes = write_response(catalog.fetch(&url).await?, &dest, expected).await?;
            debug!("Fetched {} ({} bytes)", sibling.rfilename, bytes);
        }
        for asset in assets {
            let dest = staged_path(&staging, &asset.filename)?;
            write_response(catalog.fetch_asset(&asset.url).await?, &dest, None).await?;
            debug!("Fetched auxiliary asset {}", asset.filename);
        }
        commit_snapshot(cache, model_id, &info.sha, &staging).await
    }
    .await;

    match result {
        Ok(snapshot) => {
            info!(
                "Model {} downloaded in {:.2}s",
                model_id,
                start.elapsed().as_secs_f64()
            );
            Ok(snapshot)
        }
        Err(e) => {
            warn!("Download of {} failed: {}", model_id, e);
            if let Err(cleanup) = fs::remove_dir_all(&staging).await {
                warn!("Failed to remove {}: {}", staging.display(), cleanup);
            }
            Err(e)
        }
    }
}

/// Destination of a repo file inside the staging directory
fn staged_path(staging: &Path, filename: &str) -> Result<PathBuf, ModelError> {
    let relative = Path::new(filename);
    let safe = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !safe {
        return Err(ModelError::DownloadFailed(format!(
            "refusing to write outside the snapshot: {filename}"
        )));
    }
    Ok(staging.join(relative))
}

/// Stream a response body to `dest`, verifying its sha256 when known
async fn write_response(
    response: Response,
    dest: &Path,
    expected_sha256: Option<&str>,
) -> Result<u64, ModelError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut file = fs::File::create(dest).await?;
    let mut hasher = Sha256::new();
    let mut downloaded: u64 = 0;
    let mut stream = response.bytes_stream();

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| ModelError::DownloadFailed(e.to_string()))?;
        hasher.update(&chunk);
        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;
    }
    file.flush().await?;
    drop(file);

    if let Some(expected) = expected_sha256 {
        let actual = hex::encode(hasher.finalize());
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(ModelError::VerificationFailed {
                expected: expected.to_string(),
                actual,
            });
        }
    }
    Ok(downloaded)
}

/// Move a complete staging directory into `snapshots/{rev}` and point
/// `refs/main` at it. Files already in an existing snapshot are kept.
async fn commit_snapshot(
    cache: &HubCache,
    model_id: &str,
    revision: &str,
    staging: &Path,
) -> Result<PathBuf, ModelError> {
    let repo = cache.repo_dir(model_id);
    let snapshots = repo.join("snapshots");
    let snapshot = snapshots.join(revision);
    fs::create_dir_all(&snapshots).await?;

    if fs::try_exists(&snapshot).await? {
        let (from, to) = (snapshot.clone(), staging.to_path_buf());
        tokio::task::spawn_blocking(move || carry_over(&from, &to))
            .await
            .map_err(|e| ModelError::DownloadFailed(e.to_string()))??;

        let retired = repo.join(format!(".retired-{}", Uuid::new_v4()));
        fs::rename(&snapshot, &retired).await?;
        fs::rename(staging, &snapshot).await?;
        fs::remove_dir_all(&retired).await?;
    } else {
        fs::rename(staging, &snapshot).await?;
    }

    let refs = repo.join("refs");
    fs::create_dir_all(&refs).await?;
    let tmp_ref = refs.join(format!(".main-{}", Uuid::new_v4()));
    fs::write(&tmp_ref, revision).await?;
    fs::rename(&tmp_ref, refs.join("main")).await?;
    Ok(snapshot)
}

/// Copy files present in `from` but missing in `to`
fn carry_over(from: &Path, to: &Path) -> Result<(), ModelError> {
    for entry in WalkDir::new(from).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(from) else {
            continue;
        };
        let dest = to.join(relative);
        if dest.exists() {
            continue;
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(entry.path(), &dest)?;
    }
    Ok(())
}
