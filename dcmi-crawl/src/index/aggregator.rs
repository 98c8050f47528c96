//! Series aggregation
//!
//! Groups file records by series, folds each group into per-sub-series rows,
//! then builds the instance index. Groups are folded in parallel; a group is
//! only ever touched by the task that owns its series id.

use crate::error::{CrawlError, CrawlResult};
use crate::models::{
    DiagnosticLog, FileRecord, InstanceIndex, SeriesEntry, SeriesId, SeriesIndex, SubSeriesId,
};
use rayon::prelude::*;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Aggregation output
#[derive(Debug, Default)]
pub struct Aggregation {
    pub series: SeriesIndex,
    pub instances: InstanceIndex,
    /// Scalar disagreements and duplicate copies inside one series
    pub conflicts: DiagnosticLog,
}

/// Folds file records into the series index
#[derive(Debug, Clone)]
pub struct SeriesAggregator {
    crawl_root: PathBuf,
}

impl SeriesAggregator {
    pub fn new(crawl_root: impl Into<PathBuf>) -> Self {
        Self {
            crawl_root: crawl_root.into(),
        }
    }

    /// Aggregate a complete set of records
    ///
    /// Records are ordered by path first so that last-write-wins merges are
    /// reproducible between runs.
    pub fn aggregate(&self, mut records: Vec<FileRecord>) -> CrawlResult<Aggregation> {
        records.sort_by(|a, b| a.file_path.cmp(&b.file_path));

        let mut groups: BTreeMap<SeriesId, Vec<FileRecord>> = BTreeMap::new();
        for record in records {
            groups.entry(record.series_id.clone()).or_default().push(record);
        }

        let mut folded: Vec<(SeriesId, BTreeMap<SubSeriesId, SeriesEntry>, DiagnosticLog)> = groups
            .into_par_iter()
            .map(|(series_id, group)| {
                let (subs, conflicts) = self.fold_series(group);
                (series_id, subs, conflicts)
            })
            .collect();
        folded.sort_by(|a, b| a.0.cmp(&b.0));

        let mut aggregation = Aggregation::default();
        for (series_id, subs, conflicts) in folded {
            for entry in subs.values() {
                for instance_id in entry.instances.keys() {
                    match aggregation
                        .instances
                        .insert(instance_id.clone(), series_id.clone())
                    {
                        Some(previous) if previous != series_id => {
                            return Err(CrawlError::DuplicateInstance {
                                instance: instance_id.clone(),
                                first: previous,
                                second: series_id,
                            });
                        }
                        Some(_) => {
                            warn!(
                                instance = %instance_id,
                                series = %series_id,
                                "Instance appears in several sub-series of one series"
                            );
                            aggregation.conflicts.record(format!(
                                "instance {} repeated across sub-series of {}",
                                instance_id, series_id
                            ));
                        }
                        None => {}
                    }
                }
            }
            aggregation.conflicts.absorb(conflicts);
            aggregation.series.insert_series(series_id, subs);
        }

        debug!(
            series = aggregation.series.series_count(),
            entries = aggregation.series.entry_count(),
            instances = aggregation.instances.len(),
            "Aggregation complete"
        );

        Ok(aggregation)
    }

    /// Fold the records of one series
    fn fold_series(&self, group: Vec<FileRecord>) -> (BTreeMap<SubSeriesId, SeriesEntry>, DiagnosticLog) {
        let mut subs: BTreeMap<SubSeriesId, SeriesEntry> = BTreeMap::new();
        let mut conflicts = DiagnosticLog::default();

        for record in group {
            let relative = self.relative_path(&record.file_path);

            match subs.entry(record.sub_series_id.clone()) {
                Entry::Vacant(slot) => {
                    let folder = relative
                        .parent()
                        .map(slash_path)
                        .unwrap_or_default();
                    let filename = file_within(&relative, &folder);
                    slot.insert(SeriesEntry {
                        series_id: record.series_id,
                        sub_series_id: record.sub_series_id,
                        patient_id: record.patient_id,
                        study_id: record.study_id,
                        modality: record.modality,
                        frame_of_reference_id: record.frame_of_reference_id,
                        folder,
                        instances: BTreeMap::from([(record.instance_id, filename)]),
                        raw_references: record.raw_references,
                        referenced_series_id: None,
                    });
                }
                Entry::Occupied(mut slot) => {
                    let entry = slot.get_mut();
                    merge_scalars(entry, &record, &mut conflicts);

                    let filename = file_within(&relative, &entry.folder);
                    if let Some(previous) = entry.instances.insert(record.instance_id.clone(), filename) {
                        warn!(
                            instance = %record.instance_id,
                            series = %entry.series_id,
                            previous = %previous,
                            file = %record.file_path.display(),
                            "Duplicate instance within series, keeping the later file"
                        );
                        conflicts.record(format!(
                            "instance {} of series {} stored twice ({} and {})",
                            record.instance_id,
                            entry.series_id,
                            previous,
                            record.file_path.display()
                        ));
                    }
                }
            }
        }

        (subs, conflicts)
    }

    fn relative_path(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.crawl_root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

/// Last-write-wins for scalar fields, each overwrite leaves a trail
fn merge_scalars(entry: &mut SeriesEntry, record: &FileRecord, conflicts: &mut DiagnosticLog) {
    let mut note = |field: &str, old: String, new: String| {
        warn!(
            series = %entry.series_id,
            sub_series = %entry.sub_series_id,
            field,
            old = %old,
            new = %new,
            file = %record.file_path.display(),
            "Conflicting value within series, last write wins"
        );
        conflicts.record(format!(
            "series {} {}: {:?} replaced by {:?} ({})",
            entry.series_id,
            field,
            old,
            new,
            record.file_path.display()
        ));
    };

    if entry.patient_id != record.patient_id {
        note("patient_id", entry.patient_id.to_string(), record.patient_id.to_string());
    }
    if entry.study_id != record.study_id {
        note("study_id", entry.study_id.to_string(), record.study_id.to_string());
    }
    if entry.modality != record.modality {
        note("modality", entry.modality.to_string(), record.modality.to_string());
    }
    if entry.frame_of_reference_id != record.frame_of_reference_id {
        note(
            "frame_of_reference_id",
            format!("{:?}", entry.frame_of_reference_id),
            format!("{:?}", record.frame_of_reference_id),
        );
    }
    if entry.raw_references != record.raw_references {
        note(
            "raw_references",
            format!("{:?}", entry.raw_references),
            format!("{:?}", record.raw_references),
        );
    }

    entry.patient_id = record.patient_id.clone();
    entry.study_id = record.study_id.clone();
    entry.modality = record.modality.clone();
    entry.frame_of_reference_id = record.frame_of_reference_id.clone();
    entry.raw_references = record.raw_references.clone();
}

/// Path with `/` separators regardless of platform
fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Filename relative to `folder`, or the crawl-relative path when outside it
fn file_within(relative: &Path, folder: &str) -> String {
    if folder.is_empty() {
        return slash_path(relative);
    }
    match relative.strip_prefix(folder) {
        Ok(inner) => slash_path(inner),
        Err(_) => slash_path(relative),
    }
}
