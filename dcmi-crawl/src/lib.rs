//! dcmi-crawl library interface
//!
//! Crawls a directory tree of DICOM files, builds the series and instance
//! indexes, resolves cross-series references and answers modality queries
//! over the resulting series forest.

pub mod crawler;
pub mod error;
pub mod forest;
pub mod index;
pub mod models;
pub mod services;

pub use crate::crawler::{CrawlOutcome, Crawler};
pub use crate::error::{CrawlError, CrawlResult};
pub use crate::forest::{Forest, QueryEngine, QueryMatch};
pub use crate::index::IndexStore;
pub use crate::services::{DicomTagReader, FileScanner, TagReader};
