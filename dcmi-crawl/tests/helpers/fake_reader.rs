//! In-memory tag reader keyed by file path

use dcmi_crawl::services::{Field, TagMap, TagReadError, TagReader};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// What the fake reader returns for one path
#[derive(Debug, Clone)]
pub enum FakeFile {
    Tags(TagMap),
    Unreadable,
    /// Panics inside the worker
    Panic,
}

/// [`TagReader`] serving canned tag maps; counts every read
#[derive(Debug, Clone, Default)]
pub struct FakeTagReader {
    files: Arc<HashMap<PathBuf, FakeFile>>,
    reads: Arc<AtomicUsize>,
}

impl FakeTagReader {
    pub fn new(files: HashMap<PathBuf, FakeFile>) -> Self {
        Self {
            files: Arc::new(files),
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared counter, still readable after the reader moved into a crawler
    pub fn read_counter(&self) -> Arc<AtomicUsize> {
        self.reads.clone()
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl TagReader for FakeTagReader {
    fn read(&self, path: &Path, _fields: &[Field]) -> Result<TagMap, TagReadError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        match self.files.get(path) {
            Some(FakeFile::Tags(tags)) => Ok(tags.clone()),
            Some(FakeFile::Panic) => panic!("fake reader asked to panic on {}", path.display()),
            Some(FakeFile::Unreadable) | None => Err(TagReadError::Unreadable(
                path.to_path_buf(),
                "not a DICOM file".to_string(),
            )),
        }
    }
}
