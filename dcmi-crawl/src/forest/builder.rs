//! Series forest
//!
//! Nodes live in one arena and refer to each other by [`NodeId`]. Every
//! series appears at most once: as a root, as the child of exactly one
//! parent, or in the orphan list.

use crate::error::{CrawlError, CrawlResult};
use crate::models::{Modality, PatientId, SeriesEntry, SeriesId, SeriesIndex, StudyId, SubSeriesId};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, warn};

/// Index into [`Forest::nodes`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub usize);

/// One series, all of its sub-series folded together
#[derive(Debug, Clone)]
pub struct SeriesNode {
    pub series_id: SeriesId,
    pub modality: Modality,
    pub patient_id: PatientId,
    pub study_id: StudyId,
    pub folder: String,
    pub sub_series: Vec<SubSeriesId>,
    pub instance_count: usize,
    pub referenced_series_id: Option<SeriesId>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

/// Why a series was left out of the forest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanReason {
    /// Carries references, none of which resolved
    Unresolved,
    /// References a series that is not in the index
    MissingParent,
    /// Part of a reference cycle, or below another orphan
    Unreachable,
}

impl fmt::Display for OrphanReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OrphanReason::Unresolved => "unresolved reference",
            OrphanReason::MissingParent => "referenced series missing",
            OrphanReason::Unreachable => "unreachable from any root",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Orphan {
    pub series_id: SeriesId,
    pub modality: Modality,
    pub referenced_series_id: Option<SeriesId>,
    pub reason: OrphanReason,
}

#[derive(Debug, Clone, Default)]
pub struct Forest {
    nodes: Vec<SeriesNode>,
    roots: Vec<NodeId>,
    orphans: Vec<Orphan>,
    lookup: BTreeMap<SeriesId, NodeId>,
}

/// Rows of one series folded before placement
struct Folded<'a> {
    first: &'a SeriesEntry,
    sub_series: Vec<SubSeriesId>,
    instance_count: usize,
    referenced_series_id: Option<SeriesId>,
    has_raw_references: bool,
}

impl Forest {
    /// Build from every row of a series index
    pub fn from_index(index: &SeriesIndex) -> CrawlResult<Self> {
        Self::build(index.entries())
    }

    /// Build from index rows
    ///
    /// Duplicate `(series, sub-series)` rows and series recorded with two
    /// modalities are rejected before any node is placed.
    pub fn build<'a>(rows: impl IntoIterator<Item = &'a SeriesEntry>) -> CrawlResult<Self> {
        let folded = fold_rows(rows)?;

        let mut roots: Vec<&SeriesId> = Vec::new();
        let mut children_of: BTreeMap<&SeriesId, Vec<&SeriesId>> = BTreeMap::new();
        let mut orphans: BTreeMap<SeriesId, Orphan> = BTreeMap::new();

        for (series_id, series) in &folded {
            let modality = &series.first.modality;
            if modality.is_anchor() {
                roots.push(*series_id);
                continue;
            }
            match &series.referenced_series_id {
                Some(target) if folded.contains_key(target) => {
                    children_of.entry(target).or_default().push(*series_id);
                }
                Some(target) => {
                    orphans.insert(
                        (*series_id).clone(),
                        orphan(series, OrphanReason::MissingParent, Some(target.clone())),
                    );
                }
                None if series.has_raw_references => {
                    orphans.insert((*series_id).clone(), orphan(series, OrphanReason::Unresolved, None));
                }
                None => roots.push(*series_id),
            }
        }

        let mut forest = Forest::default();
        for root in roots {
            let id = forest.place(&folded, &children_of, root, None);
            forest.roots.push(id);
        }

        // Anything not placed yet sits on a cycle or under an orphan
        for (series_id, series) in &folded {
            if forest.lookup.contains_key(*series_id) || orphans.contains_key(*series_id) {
                continue;
            }
            orphans.insert(
                (*series_id).clone(),
                orphan(series, OrphanReason::Unreachable, series.referenced_series_id.clone()),
            );
        }

        for o in orphans.values() {
            warn!(
                series = %o.series_id,
                modality = %o.modality,
                reason = %o.reason,
                "Series left out of the forest"
            );
        }
        forest.orphans = orphans.into_values().collect();

        debug!(
            nodes = forest.nodes.len(),
            roots = forest.roots.len(),
            orphans = forest.orphans.len(),
            "Forest built"
        );
        Ok(forest)
    }

    /// Place `series_id` and its subtree, children in series id order
    fn place(
        &mut self,
        folded: &BTreeMap<&SeriesId, Folded<'_>>,
        children_of: &BTreeMap<&SeriesId, Vec<&SeriesId>>,
        series_id: &SeriesId,
        parent: Option<NodeId>,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        if let Some(series) = folded.get(series_id) {
            let first = series.first;
            self.nodes.push(SeriesNode {
                series_id: series_id.clone(),
                modality: first.modality.clone(),
                patient_id: first.patient_id.clone(),
                study_id: first.study_id.clone(),
                folder: first.folder.clone(),
                sub_series: series.sub_series.clone(),
                instance_count: series.instance_count,
                referenced_series_id: series.referenced_series_id.clone(),
                parent,
                children: Vec::new(),
            });
        }
        self.lookup.insert(series_id.clone(), id);

        if let Some(children) = children_of.get(series_id) {
            for child in children {
                // roots never appear here, so a child is placed at most once
                if self.lookup.contains_key(*child) {
                    continue;
                }
                let child_id = self.place(folded, children_of, child, Some(id));
                self.nodes[id.0].children.push(child_id);
            }
        }
        id
    }

    pub fn nodes(&self) -> &[SeriesNode] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> &SeriesNode {
        &self.nodes[id.0]
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn orphans(&self) -> &[Orphan] {
        &self.orphans
    }

    pub fn lookup(&self, series_id: &SeriesId) -> Option<NodeId> {
        self.lookup.get(series_id).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

fn orphan(series: &Folded<'_>, reason: OrphanReason, target: Option<SeriesId>) -> Orphan {
    Orphan {
        series_id: series.first.series_id.clone(),
        modality: series.first.modality.clone(),
        referenced_series_id: target,
        reason,
    }
}

/// Pre-check and fold rows by series id
fn fold_rows<'a>(
    rows: impl IntoIterator<Item = &'a SeriesEntry>,
) -> CrawlResult<BTreeMap<&'a SeriesId, Folded<'a>>> {
    let mut sorted: Vec<&SeriesEntry> = rows.into_iter().collect();
    sorted.sort_by(|a, b| {
        (&a.series_id, &a.sub_series_id).cmp(&(&b.series_id, &b.sub_series_id))
    });

    let mut folded: BTreeMap<&SeriesId, Folded<'a>> = BTreeMap::new();
    let mut seen: BTreeSet<(&SeriesId, &SubSeriesId)> = BTreeSet::new();

    for row in sorted {
        if !seen.insert((&row.series_id, &row.sub_series_id)) {
            return Err(CrawlError::DuplicateSeries {
                series: row.series_id.clone(),
                sub_series: row.sub_series_id.clone(),
                detail: "row appears more than once".to_string(),
            });
        }

        match folded.get_mut(&row.series_id) {
            None => {
                folded.insert(
                    &row.series_id,
                    Folded {
                        first: row,
                        sub_series: vec![row.sub_series_id.clone()],
                        instance_count: row.instance_count(),
                        referenced_series_id: row.referenced_series_id.clone(),
                        has_raw_references: !row.raw_references.is_empty(),
                    },
                );
            }
            Some(series) => {
                if series.first.modality != row.modality {
                    return Err(CrawlError::DuplicateSeries {
                        series: row.series_id.clone(),
                        sub_series: row.sub_series_id.clone(),
                        detail: format!(
                            "modality {} conflicts with {}",
                            row.modality, series.first.modality
                        ),
                    });
                }
                series.sub_series.push(row.sub_series_id.clone());
                series.instance_count += row.instance_count();
                series.has_raw_references |= !row.raw_references.is_empty();
                match (&series.referenced_series_id, &row.referenced_series_id) {
                    (None, Some(target)) => series.referenced_series_id = Some(target.clone()),
                    (Some(kept), Some(other)) if kept != other => {
                        warn!(
                            series = %row.series_id,
                            sub_series = %row.sub_series_id,
                            kept = %kept,
                            ignored = %other,
                            "Sub-series reference different series, keeping the first"
                        );
                    }
                    _ => {}
                }
            }
        }
    }
    Ok(folded)
}
