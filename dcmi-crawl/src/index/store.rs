//! Persisted index documents
//!
//! One directory per dataset holding `series_index.json` and
//! `instance_index.json`. Both are written only for a complete, resolved
//! snapshot, each through a temp file and rename.

use crate::models::{InstanceIndex, SeriesIndex};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

pub const SERIES_INDEX_FILE: &str = "series_index.json";
pub const INSTANCE_INDEX_FILE: &str = "instance_index.json";

/// Index persistence errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Index I/O error at {0}: {1}")]
    Io(PathBuf, #[source] io::Error),

    /// Document exists but does not parse (including duplicate keys)
    #[error("Corrupt index document {0}: {1}")]
    Corrupt(PathBuf, #[source] serde_json::Error),

    #[error("Failed to serialize index: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Which index documents are present on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Complete,
    /// Only one of the two documents exists
    Partial,
    Missing,
}

/// Location of one dataset's index documents
#[derive(Debug, Clone)]
pub struct IndexStore {
    dir: PathBuf,
}

impl IndexStore {
    pub fn new(index_dir: impl AsRef<Path>, dataset: &str) -> Self {
        Self {
            dir: index_dir.as_ref().join(dataset),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn series_path(&self) -> PathBuf {
        self.dir.join(SERIES_INDEX_FILE)
    }

    pub fn instance_path(&self) -> PathBuf {
        self.dir.join(INSTANCE_INDEX_FILE)
    }

    pub fn status(&self) -> CacheStatus {
        match (self.series_path().is_file(), self.instance_path().is_file()) {
            (true, true) => CacheStatus::Complete,
            (false, false) => CacheStatus::Missing,
            _ => CacheStatus::Partial,
        }
    }

    /// Load both documents; `None` unless both exist
    pub fn load(&self) -> Result<Option<(SeriesIndex, InstanceIndex)>, StoreError> {
        if self.status() != CacheStatus::Complete {
            return Ok(None);
        }

        let series: SeriesIndex = read_document(&self.series_path())?;
        let instances: InstanceIndex = read_document(&self.instance_path())?;

        debug!(
            dir = %self.dir.display(),
            series = series.series_count(),
            instances = instances.len(),
            "Loaded index"
        );
        Ok(Some((series, instances)))
    }

    /// Persist both documents
    pub fn save(&self, series: &SeriesIndex, instances: &InstanceIndex) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|e| StoreError::Io(self.dir.clone(), e))?;

        write_document(&self.series_path(), series)?;
        write_document(&self.instance_path(), instances)?;

        info!(
            dir = %self.dir.display(),
            series = series.series_count(),
            instances = instances.len(),
            "Index saved"
        );
        Ok(())
    }
}

fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let content = fs::read_to_string(path).map_err(|e| StoreError::Io(path.to_path_buf(), e))?;
    serde_json::from_str(&content).map_err(|e| StoreError::Corrupt(path.to_path_buf(), e))
}

fn write_document<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let mut content = serde_json::to_string_pretty(value)?;
    content.push('\n');

    let temp_path = path.with_extension("json.tmp");
    fs::write(&temp_path, content).map_err(|e| StoreError::Io(temp_path.clone(), e))?;
    fs::rename(&temp_path, path).map_err(|e| StoreError::Io(path.to_path_buf(), e))?;
    Ok(())
}
