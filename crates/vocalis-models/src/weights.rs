//! Read-only access to cached model files

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use serde::de::DeserializeOwned;

use crate::error::ModelError;

/// Memory-mapped weight file
pub struct MappedWeights {
    path: PathBuf,
    mmap: Mmap,
}

impl MappedWeights {
    /// Map `path` read-only. Empty files are rejected.
    pub fn open(path: &Path) -> Result<Self, ModelError> {
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Err(ModelError::InvalidModelFile(format!(
                "{} is empty",
                path.display()
            )));
        }
        // SAFETY: snapshot files are never written in place; downloads
        // replace whole snapshot directories
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self {
            path: path.to_path_buf(),
            mmap,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}

impl std::fmt::Debug for MappedWeights {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedWeights")
            .field("path", &self.path)
            .field("len", &self.mmap.len())
            .finish()
    }
}

/// Parse a JSON file shipped with a model
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ModelError> {
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text)
        .map_err(|e| ModelError::InvalidModelFile(format!("{}: {}", path.display(), e)))
}
