//! DICOM file scanner
//!
//! Two-phase scanning: sequential directory traversal with symlink loop
//! detection, then parallel candidate verification (extension filter plus the
//! optional `DICM` preamble check).

use dcmi_common::CrawlSettings;
use rayon::prelude::*;
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

/// Byte offset of the DICOM Part 10 magic, after the 128-byte preamble
const DICM_OFFSET: usize = 128;

/// File scanner errors
#[derive(Debug, Error)]
pub enum ScanError {
    /// Specified path does not exist
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    /// Path exists but is not a directory
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Cannot access file
    #[error("File access error {0}: {1}")]
    FileAccessError(PathBuf, String),
}

/// Scan result with statistics
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    /// Candidate DICOM files, sorted by path
    pub files: Vec<PathBuf>,
    /// Total size of all files in bytes
    pub total_size: u64,
    /// Count of files by extension ("" for none)
    pub by_extension: BTreeMap<String, usize>,
    /// Traversal errors encountered
    pub errors: Vec<String>,
}

/// DICOM file scanner
#[derive(Debug, Clone)]
pub struct FileScanner {
    ignore_patterns: Vec<String>,
    extensions: Vec<String>,
    check_header: bool,
}

impl FileScanner {
    /// Create a scanner for `.dcm` files with default ignore patterns
    pub fn new() -> Self {
        Self::from_settings(&CrawlSettings::default())
    }

    pub fn from_settings(settings: &CrawlSettings) -> Self {
        Self {
            ignore_patterns: settings.ignore_patterns.clone(),
            extensions: settings
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            check_header: settings.check_header,
        }
    }

    /// Require the `DICM` magic on every candidate
    pub fn with_header_check(mut self, check_header: bool) -> Self {
        self.check_header = check_header;
        self
    }

    /// Scan directory for DICOM files
    pub fn scan(&self, root_path: &Path) -> Result<Vec<PathBuf>, ScanError> {
        Ok(self.scan_with_stats(root_path)?.files)
    }

    /// Scan with statistics
    pub fn scan_with_stats(&self, root_path: &Path) -> Result<ScanResult, ScanError> {
        if !root_path.exists() {
            return Err(ScanError::PathNotFound(root_path.to_path_buf()));
        }

        if !root_path.is_dir() {
            return Err(ScanError::NotADirectory(root_path.to_path_buf()));
        }

        // Phase 1: sequential traversal; symlink_visited is mutable state
        let mut candidate_files = Vec::new();
        let mut symlink_visited = HashSet::new();
        let mut errors = Vec::new();

        let walker = WalkDir::new(root_path)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| self.should_process_entry(e, &mut symlink_visited));

        for entry in walker {
            match entry {
                Ok(entry) => {
                    if entry.file_type().is_file() && self.has_wanted_extension(entry.path()) {
                        candidate_files.push(entry.path().to_path_buf());
                    }
                }
                Err(e) => {
                    tracing::warn!("Error accessing entry: {}", e);
                    errors.push(e.to_string());
                }
            }
        }

        tracing::debug!(
            "Phase 1 complete: {} candidate files discovered",
            candidate_files.len()
        );

        // Phase 2: parallel verification, each thread reads its own file
        let verified: Vec<(PathBuf, u64)> = candidate_files
            .par_iter()
            .filter_map(|path| match self.verify(path) {
                Ok(Some(size)) => Some((path.clone(), size)),
                Ok(None) => None,
                Err(e) => {
                    tracing::warn!("Error verifying {}: {}", path.display(), e);
                    None
                }
            })
            .collect();

        tracing::debug!(
            "Phase 2 complete: {} files verified from {} candidates",
            verified.len(),
            candidate_files.len()
        );

        let mut result = ScanResult {
            errors,
            ..ScanResult::default()
        };
        for (path, size) in verified {
            result.total_size += size;
            *result.by_extension.entry(extension_of(&path)).or_insert(0) += 1;
            result.files.push(path);
        }
        result.files.sort();

        Ok(result)
    }

    /// Check if entry should be processed
    fn should_process_entry(&self, entry: &DirEntry, symlink_visited: &mut HashSet<PathBuf>) -> bool {
        let path = entry.path();
        let file_name = entry.file_name().to_string_lossy();

        // Root is always walked, even when its own name matches a pattern
        if entry.depth() > 0 && self.ignore_patterns.iter().any(|p| file_name == p.as_str()) {
            return false;
        }

        if entry.file_type().is_symlink() {
            if let Ok(canonical) = path.canonicalize() {
                if !symlink_visited.insert(canonical) {
                    tracing::warn!("Symlink loop detected: {}", path.display());
                    return false;
                }
            }
        }

        true
    }

    /// Extension filter; an empty list accepts everything
    fn has_wanted_extension(&self, path: &Path) -> bool {
        self.extensions.is_empty() || self.extensions.contains(&extension_of(path))
    }

    /// Returns the file size when the file qualifies
    fn verify(&self, path: &Path) -> Result<Option<u64>, ScanError> {
        let size = std::fs::metadata(path)
            .map_err(|e| ScanError::FileAccessError(path.to_path_buf(), e.to_string()))?
            .len();

        if self.check_header && !has_dicm_magic(path)? {
            return Ok(None);
        }

        Ok(Some(size))
    }
}

impl Default for FileScanner {
    fn default() -> Self {
        Self::new()
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Verify the Part 10 header: 128-byte preamble followed by `DICM`
pub fn has_dicm_magic(path: &Path) -> Result<bool, ScanError> {
    let mut file = File::open(path)
        .map_err(|e| ScanError::FileAccessError(path.to_path_buf(), e.to_string()))?;

    let mut buffer = [0u8; DICM_OFFSET + 4];
    let mut filled = 0;
    while filled < buffer.len() {
        let n = file
            .read(&mut buffer[filled..])
            .map_err(|e| ScanError::FileAccessError(path.to_path_buf(), e.to_string()))?;
        if n == 0 {
            break;
        }
        filled += n;
    }

    Ok(filled == buffer.len() && &buffer[DICM_OFFSET..] == b"DICM")
}
