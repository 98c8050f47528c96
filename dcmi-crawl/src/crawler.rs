//! Crawl pipeline
//!
//! scan → classify (worker pool) → barrier → aggregate → resolve → save.
//! A complete persisted index short-circuits the whole pipeline unless the
//! crawl is forced. Nothing is written unless every stage succeeded.

use crate::error::{CrawlError, CrawlResult};
use crate::index::{resolve, CacheStatus, IndexStore, SeriesAggregator};
use crate::models::{CrawlReport, FileRecord, InstanceIndex, SeriesIndex};
use crate::services::{classify, ClassifyError, FileScanner, TagReader, REQUESTED_FIELDS};
use rayon::prelude::*;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Files between progress log lines
const PROGRESS_INTERVAL: usize = 1000;

/// Result of a successful crawl
#[derive(Debug)]
pub struct CrawlOutcome {
    pub series: SeriesIndex,
    pub instances: InstanceIndex,
    pub report: CrawlReport,
}

/// What one worker produced for one file
enum FileOutcome {
    Record(FileRecord),
    Unreadable(String),
    MissingField(ClassifyError),
    /// Not attempted because the crawl was cancelled
    Skipped,
}

/// Drives one crawl of a directory tree
pub struct Crawler<R: TagReader> {
    reader: R,
    store: IndexStore,
    scanner: FileScanner,
    workers: Option<usize>,
    force: bool,
}

impl<R: TagReader> Crawler<R> {
    pub fn new(reader: R, store: IndexStore) -> Self {
        Self {
            reader,
            store,
            scanner: FileScanner::new(),
            workers: None,
            force: false,
        }
    }

    pub fn with_scanner(mut self, scanner: FileScanner) -> Self {
        self.scanner = scanner;
        self
    }

    /// Worker pool size; `None` or `0` uses one worker per core
    pub fn with_workers(mut self, workers: Option<usize>) -> Self {
        self.workers = workers;
        self
    }

    /// Ignore any persisted index and overwrite it
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    /// Crawl `root`, or load its persisted index
    ///
    /// Blocking; callers on an async runtime should use `spawn_blocking`.
    pub fn run(&self, root: &Path, cancel: &CancellationToken) -> CrawlResult<CrawlOutcome> {
        let start = Instant::now();
        let mut report = CrawlReport::new();

        if !self.force {
            match self.store.status() {
                CacheStatus::Complete => {
                    if let Some((series, instances)) = self.store.load()? {
                        info!(dir = %self.store.dir().display(), "Using persisted index");
                        report.from_cache = true;
                        fill_totals(&mut report, &series, &instances);
                        report.resolved_references = series
                            .entries()
                            .filter(|e| e.referenced_series_id.is_some())
                            .count();
                        report.finish();
                        return Ok(CrawlOutcome {
                            series,
                            instances,
                            report,
                        });
                    }
                }
                CacheStatus::Partial => {
                    warn!(dir = %self.store.dir().display(), "Persisted index incomplete, crawling again");
                }
                CacheStatus::Missing => {}
            }
        }

        info!(root = %root.display(), "Phase 1: scanning");
        let scan = self.scanner.scan_with_stats(root)?;
        report.files_found = scan.files.len();
        info!(
            files = scan.files.len(),
            total_size_mb = scan.total_size / 1_000_000,
            walker_errors = scan.errors.len(),
            "Scan complete"
        );
        check_cancelled(cancel)?;

        info!(files = scan.files.len(), "Phase 2: classifying");
        let records = self.classify_all(&scan.files, cancel, &mut report)?;
        // barrier: every worker has returned before aggregation starts
        check_cancelled(cancel)?;
        report.files_classified = records.len();

        info!(records = records.len(), "Phase 3: aggregating");
        let aggregation = SeriesAggregator::new(root).aggregate(records)?;
        let mut series = aggregation.series;
        let instances = aggregation.instances;
        report.field_conflicts.absorb(aggregation.conflicts);
        check_cancelled(cancel)?;

        info!(series = series.series_count(), "Phase 4: resolving references");
        let summary = resolve(&mut series, &instances);
        report.resolved_references = summary.resolved;
        report.ambiguous_references.absorb(summary.ambiguous);
        report.unresolved_references.absorb(summary.unresolved);
        check_cancelled(cancel)?;

        self.store.save(&series, &instances)?;

        fill_totals(&mut report, &series, &instances);
        report.finish();
        info!(
            series = report.series,
            instances = report.instances,
            failed = report.files_failed(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Crawl complete"
        );

        Ok(CrawlOutcome {
            series,
            instances,
            report,
        })
    }

    /// Classify every file on the worker pool
    ///
    /// Per-file failures, including panics, land in the report; a cancelled
    /// crawl returns `Cancelled` and drops whatever was classified.
    fn classify_all(
        &self,
        files: &[PathBuf],
        cancel: &CancellationToken,
        report: &mut CrawlReport,
    ) -> CrawlResult<Vec<FileRecord>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers.unwrap_or(0))
            .build()
            .map_err(|e| CrawlError::WorkerPool(e.to_string()))?;

        let total = files.len();
        let processed = AtomicUsize::new(0);

        let outcomes: Vec<FileOutcome> = pool.install(|| {
            files
                .par_iter()
                .map(|path| {
                    if cancel.is_cancelled() {
                        return FileOutcome::Skipped;
                    }

                    let outcome = catch_unwind(AssertUnwindSafe(|| self.classify_file(path)))
                        .unwrap_or_else(|panic| {
                            FileOutcome::Unreadable(format!(
                                "{}: worker panicked: {}",
                                path.display(),
                                panic_message(panic.as_ref())
                            ))
                        });

                    let done = processed.fetch_add(1, Ordering::Relaxed) + 1;
                    if done % PROGRESS_INTERVAL == 0 {
                        info!("Classification progress: {}/{}", done, total);
                    }
                    outcome
                })
                .collect()
        });

        check_cancelled(cancel)?;

        let mut records = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome {
                FileOutcome::Record(record) => records.push(record),
                FileOutcome::Unreadable(message) => {
                    warn!("{}", message);
                    report.unreadable_files.record(message);
                }
                FileOutcome::MissingField(err) => {
                    warn!(error = %err, "File skipped");
                    report.missing_fields.record(err.to_string());
                }
                FileOutcome::Skipped => {}
            }
        }

        debug!(
            classified = records.len(),
            failed = report.files_failed(),
            "Classification complete"
        );
        Ok(records)
    }

    fn classify_file(&self, path: &Path) -> FileOutcome {
        let tags = match self.reader.read(path, &REQUESTED_FIELDS) {
            Ok(tags) => tags,
            Err(e) => return FileOutcome::Unreadable(e.to_string()),
        };
        match classify(&tags, path) {
            Ok(record) => {
                debug!(file = %path.display(), modality = %record.modality, "Classified");
                FileOutcome::Record(record)
            }
            Err(e) => FileOutcome::MissingField(e),
        }
    }
}

fn check_cancelled(cancel: &CancellationToken) -> CrawlResult<()> {
    if cancel.is_cancelled() {
        info!("Crawl cancelled, nothing persisted");
        return Err(CrawlError::Cancelled);
    }
    Ok(())
}

fn fill_totals(report: &mut CrawlReport, series: &SeriesIndex, instances: &InstanceIndex) {
    report.series = series.series_count();
    report.entries = series.entry_count();
    report.instances = instances.len();
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
