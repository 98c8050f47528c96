//! Error types for dcmi-crawl
//!
//! Integrity errors abort the run and prevent persistence. Per-file and
//! reference problems are not errors here; they are collected in
//! [`CrawlReport`](crate::models::CrawlReport).

use crate::index::store::StoreError;
use crate::models::{InstanceId, SeriesId, SubSeriesId};
use crate::services::file_scanner::ScanError;
use thiserror::Error;

/// Fatal crawl error
#[derive(Debug, Error)]
pub enum CrawlError {
    /// One SOPInstanceUID claimed by two different series
    #[error("Instance {instance} belongs to both series {first} and {second}")]
    DuplicateInstance {
        instance: InstanceId,
        first: SeriesId,
        second: SeriesId,
    },

    /// Index rows that cannot coexist in one forest
    #[error("Duplicate series {series} (sub-series {sub_series}): {detail}")]
    DuplicateSeries {
        series: SeriesId,
        sub_series: SubSeriesId,
        detail: String,
    },

    /// Crawl cancelled before completion; nothing was persisted
    #[error("Crawl cancelled")]
    Cancelled,

    /// Directory traversal failed
    #[error(transparent)]
    Scan(#[from] ScanError),

    /// Index persistence failed or the stored index is corrupt
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Worker pool could not be created
    #[error("Worker pool error: {0}")]
    WorkerPool(String),
}

/// Result type for crawl operations
pub type CrawlResult<T> = Result<T, CrawlError>;
