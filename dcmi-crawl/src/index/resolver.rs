//! Reference resolution
//!
//! Fills `referenced_series_id` on every row once the series index and the
//! instance index are complete. Decisions are computed in parallel against
//! read-only indexes, then applied; each row is written exactly once.
//!
//! Order of precedence per row:
//! 1. a directly referenced series that exists
//! 2. referenced instances, tier by tier, mapped through the instance index
//! 3. the frame of reference shared with exactly one anchor series

use crate::models::{
    DiagnosticLog, FrameOfReferenceId, InstanceIndex, Modality, SeriesEntry, SeriesId,
    SeriesIndex, SubSeriesId,
};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// How a reference was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedVia {
    Series,
    Instance,
    FrameOfReference,
}

/// Outcome for one row
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Resolution {
    pub target: Option<SeriesId>,
    pub via: Option<ResolvedVia>,
    /// Every distinct candidate when more than one qualified
    pub candidates: Vec<SeriesId>,
    /// The row carried references that led nowhere
    pub unresolved: bool,
}

impl Resolution {
    fn found(target: SeriesId, via: ResolvedVia, candidates: Vec<SeriesId>) -> Self {
        Self {
            target: Some(target),
            via: Some(via),
            candidates: if candidates.len() > 1 { candidates } else { Vec::new() },
            unresolved: false,
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        self.candidates.len() > 1
    }
}

/// Totals for the run report
#[derive(Debug, Default)]
pub struct ResolutionSummary {
    pub resolved: usize,
    pub via_series: usize,
    pub via_instance: usize,
    pub via_frame: usize,
    pub ambiguous: DiagnosticLog,
    pub unresolved: DiagnosticLog,
}

/// `FrameOfReferenceID → series sharing it`
#[derive(Debug, Default)]
pub struct FrameIndex(BTreeMap<FrameOfReferenceId, BTreeSet<SeriesId>>);

impl FrameIndex {
    pub fn build(index: &SeriesIndex) -> Self {
        let mut frames: BTreeMap<FrameOfReferenceId, BTreeSet<SeriesId>> = BTreeMap::new();
        for entry in index.entries() {
            if let Some(frame) = &entry.frame_of_reference_id {
                frames
                    .entry(frame.clone())
                    .or_default()
                    .insert(entry.series_id.clone());
            }
        }
        Self(frames)
    }

    /// Series sharing `frame`, excluding `own`
    ///
    /// Every modality is listed here. The frame fallback in [`resolve`] only
    /// attaches to a CT or MR series among them; two non-anchor series on one
    /// frame are never linked to each other.
    pub fn others<'a>(
        &'a self,
        frame: &FrameOfReferenceId,
        own: &'a SeriesId,
    ) -> impl Iterator<Item = &'a SeriesId> + 'a {
        self.0
            .get(frame)
            .into_iter()
            .flat_map(|set| set.iter())
            .filter(move |s| *s != own)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Resolve every row of `index` in place
pub fn resolve(index: &mut SeriesIndex, instances: &InstanceIndex) -> ResolutionSummary {
    let frames = FrameIndex::build(index);

    let decisions: Vec<((SeriesId, SubSeriesId), Resolution)> = {
        let shared: &SeriesIndex = index;
        let rows: Vec<&SeriesEntry> = shared.entries().collect();
        rows.par_iter()
            .map(|entry| {
                let key = (entry.series_id.clone(), entry.sub_series_id.clone());
                (key, resolve_entry(entry, shared, instances, &frames))
            })
            .collect()
    };

    let mut summary = ResolutionSummary::default();
    for ((series_id, sub_series_id), resolution) in decisions {
        let Some(entry) = index.get_mut(&series_id, &sub_series_id) else {
            continue;
        };

        if resolution.is_ambiguous() {
            let picked = resolution
                .target
                .as_ref()
                .map(SeriesId::to_string)
                .unwrap_or_else(|| "none".to_string());
            summary.ambiguous.record(format!(
                "{} {} references {} series ({}), picked {}",
                entry.modality,
                series_id,
                resolution.candidates.len(),
                join(&resolution.candidates),
                picked
            ));
        }
        if resolution.unresolved {
            summary
                .unresolved
                .record(format!("{} {} references nothing in the index", entry.modality, series_id));
        }

        match resolution.via {
            Some(ResolvedVia::Series) => summary.via_series += 1,
            Some(ResolvedVia::Instance) => summary.via_instance += 1,
            Some(ResolvedVia::FrameOfReference) => summary.via_frame += 1,
            None => {}
        }
        if resolution.target.is_some() {
            summary.resolved += 1;
        }
        entry.referenced_series_id = resolution.target;
    }

    debug!(
        resolved = summary.resolved,
        via_series = summary.via_series,
        via_instance = summary.via_instance,
        via_frame = summary.via_frame,
        frames = frames.len(),
        "Reference resolution complete"
    );

    summary
}

/// Decide the reference of one row
pub fn resolve_entry(
    entry: &SeriesEntry,
    index: &SeriesIndex,
    instances: &InstanceIndex,
    frames: &FrameIndex,
) -> Resolution {
    let own = &entry.series_id;
    let refs = &entry.raw_references;

    // 1. Direct series references
    let direct = distinct(
        refs.series_candidates()
            .into_iter()
            .filter(|s| *s != own && index.contains_series(s)),
    );
    if let Some(first) = direct.first().cloned() {
        if direct.len() > 1 {
            warn!(
                modality = %entry.modality,
                series = %own,
                candidates = direct.len(),
                picked = %first,
                "Several referenced series exist, using the first"
            );
        }
        return Resolution::found(first, ResolvedVia::Series, direct);
    }

    // 2. Instance references through the instance index, highest tier first
    for tier in refs.instance_tiers() {
        let found = distinct(
            tier.into_iter()
                .filter_map(|instance| instances.get(instance))
                .filter(|s| *s != own && index.contains_series(s)),
        );
        if let Some(first) = found.first().cloned() {
            if found.len() > 1 {
                warn!(
                    modality = %entry.modality,
                    series = %own,
                    candidates = found.len(),
                    picked = %first,
                    "Referenced instances span several series, using the first"
                );
            }
            return Resolution::found(first, ResolvedVia::Instance, found);
        }
    }

    let had_references = !refs.is_empty();
    if had_references {
        warn!(
            modality = %entry.modality,
            series = %own,
            "No referenced series or instance found in the index"
        );
    }

    // 3. Shared frame of reference with a single anchor series
    if !entry.modality.is_anchor() {
        if let Some(frame) = &entry.frame_of_reference_id {
            let anchors = distinct(frames.others(frame, own).filter(|s| is_anchor_series(index, s)));
            match anchors.len() {
                0 => {}
                1 => {
                    debug!(
                        modality = %entry.modality,
                        series = %own,
                        target = %anchors[0],
                        "Resolved through shared frame of reference"
                    );
                    return Resolution::found(anchors[0].clone(), ResolvedVia::FrameOfReference, anchors);
                }
                n => {
                    warn!(
                        modality = %entry.modality,
                        series = %own,
                        frame = %frame,
                        candidates = n,
                        "Frame of reference shared with several anchor series, leaving unresolved"
                    );
                    return Resolution {
                        target: None,
                        via: None,
                        candidates: anchors,
                        unresolved: had_references,
                    };
                }
            }
        }
    }

    Resolution {
        target: None,
        via: None,
        candidates: Vec::new(),
        unresolved: had_references,
    }
}

fn is_anchor_series(index: &SeriesIndex, series_id: &SeriesId) -> bool {
    series_modality(index, series_id).is_some_and(Modality::is_anchor)
}

/// Distinct ids, first-seen order
fn distinct<'a>(ids: impl Iterator<Item = &'a SeriesId>) -> Vec<SeriesId> {
    let mut seen = BTreeSet::new();
    ids.filter(|id| seen.insert(*id)).cloned().collect()
}

fn join(ids: &[SeriesId]) -> String {
    ids.iter().map(SeriesId::as_str).collect::<Vec<_>>().join(", ")
}

/// Modality of the first row of a series
pub fn series_modality<'a>(index: &'a SeriesIndex, series_id: &SeriesId) -> Option<&'a Modality> {
    index
        .series(series_id)
        .and_then(|subs| subs.values().next())
        .map(|entry| &entry.modality)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        InstanceId, PatientId, RawReferences, ReportedSeries, StructureSetReference, StudyId,
    };

    fn entry(series: &str, modality: Modality, refs: RawReferences, instances: &[&str]) -> SeriesEntry {
        SeriesEntry {
            series_id: SeriesId::from(series),
            sub_series_id: SubSeriesId::default(),
            patient_id: PatientId::from("P1"),
            study_id: StudyId::from("ST1"),
            modality,
            frame_of_reference_id: None,
            folder: series.to_string(),
            instances: instances
                .iter()
                .map(|i| (InstanceId::from(*i), format!("{}.dcm", i)))
                .collect(),
            raw_references: refs,
            referenced_series_id: None,
        }
    }

    fn build(entries: Vec<SeriesEntry>) -> (SeriesIndex, InstanceIndex) {
        let mut index = SeriesIndex::new();
        let mut instances = InstanceIndex::new();
        for e in entries {
            for i in e.instances.keys() {
                instances.insert(i.clone(), e.series_id.clone());
            }
            index.insert_series(
                e.series_id.clone(),
                BTreeMap::from([(e.sub_series_id.clone(), e)]),
            );
        }
        (index, instances)
    }

    fn target(index: &SeriesIndex, series: &str) -> Option<String> {
        index
            .get(&SeriesId::from(series), &SubSeriesId::default())
            .and_then(|e| e.referenced_series_id.as_ref())
            .map(|s| s.to_string())
    }

    #[test]
    fn test_direct_series_reference() {
        let (mut index, instances) = build(vec![
            entry("CT1", Modality::Ct, RawReferences::None, &["c1"]),
            entry(
                "RS1",
                Modality::RtStruct,
                RawReferences::StructureSet {
                    target: StructureSetReference::Series(SeriesId::from("CT1")),
                },
                &["r1"],
            ),
        ]);
        let summary = resolve(&mut index, &instances);
        assert_eq!(target(&index, "RS1").as_deref(), Some("CT1"));
        assert_eq!(target(&index, "CT1"), None);
        assert_eq!(summary.via_series, 1);
        assert!(summary.unresolved.is_empty());
    }

    #[test]
    fn test_missing_direct_series_falls_through_to_instances() {
        let (mut index, instances) = build(vec![
            entry("CT1", Modality::Ct, RawReferences::None, &["c1", "c2"]),
            entry(
                "SEG1",
                Modality::Seg,
                RawReferences::Segmentation {
                    series: Some(SeriesId::from("NOT-CRAWLED")),
                    instances: vec![InstanceId::from("c2")],
                },
                &["g1"],
            ),
        ]);
        let summary = resolve(&mut index, &instances);
        assert_eq!(target(&index, "SEG1").as_deref(), Some("CT1"));
        assert_eq!(summary.via_instance, 1);
    }

    #[test]
    fn test_dose_prefers_structure_set_over_plan() {
        let (mut index, instances) = build(vec![
            entry("CT1", Modality::Ct, RawReferences::None, &["c1"]),
            entry("RS1", Modality::RtStruct, RawReferences::None, &["rs"]),
            entry("RP1", Modality::RtPlan, RawReferences::None, &["rp"]),
            entry(
                "RD1",
                Modality::RtDose,
                RawReferences::Dose {
                    series: None,
                    structure_set: Some(InstanceId::from("rs")),
                    plan: Some(InstanceId::from("rp")),
                },
                &["rd"],
            ),
        ]);
        resolve(&mut index, &instances);
        assert_eq!(target(&index, "RD1").as_deref(), Some("RS1"));
    }

    #[test]
    fn test_dose_plan_used_when_structure_set_missing() {
        let (mut index, instances) = build(vec![
            entry("RP1", Modality::RtPlan, RawReferences::None, &["rp"]),
            entry(
                "RD1",
                Modality::RtDose,
                RawReferences::Dose {
                    series: None,
                    structure_set: Some(InstanceId::from("gone")),
                    plan: Some(InstanceId::from("rp")),
                },
                &["rd"],
            ),
        ]);
        resolve(&mut index, &instances);
        assert_eq!(target(&index, "RD1").as_deref(), Some("RP1"));
    }

    #[test]
    fn test_dose_series_reference_beats_instances() {
        let (mut index, instances) = build(vec![
            entry("CT1", Modality::Ct, RawReferences::None, &["c1"]),
            entry("RS1", Modality::RtStruct, RawReferences::None, &["rs"]),
            entry(
                "RD1",
                Modality::RtDose,
                RawReferences::Dose {
                    series: Some(SeriesId::from("CT1")),
                    structure_set: Some(InstanceId::from("rs")),
                    plan: None,
                },
                &["rd"],
            ),
        ]);
        resolve(&mut index, &instances);
        assert_eq!(target(&index, "RD1").as_deref(), Some("CT1"));
    }

    #[test]
    fn test_ambiguous_segmentation_picks_first_referenced() {
        let (mut index, instances) = build(vec![
            entry("CT-B", Modality::Ct, RawReferences::None, &["b1"]),
            entry("CT-A", Modality::Ct, RawReferences::None, &["a1"]),
            entry(
                "SEG1",
                Modality::Seg,
                RawReferences::Segmentation {
                    series: None,
                    instances: vec![InstanceId::from("b1"), InstanceId::from("a1")],
                },
                &["g1"],
            ),
        ]);
        let summary = resolve(&mut index, &instances);
        assert_eq!(target(&index, "SEG1").as_deref(), Some("CT-B"));
        assert_eq!(summary.ambiguous.count, 1);
        assert!(summary.ambiguous.examples[0].contains("picked CT-B"));
    }

    #[test]
    fn test_report_with_several_existing_series() {
        let (mut index, instances) = build(vec![
            entry("CT1", Modality::Ct, RawReferences::None, &["c1"]),
            entry("PT1", Modality::Pt, RawReferences::None, &["p1"]),
            entry(
                "SR1",
                Modality::Sr,
                RawReferences::Report {
                    series: vec![
                        ReportedSeries {
                            series: SeriesId::from("PT1"),
                            instances: vec![],
                        },
                        ReportedSeries {
                            series: SeriesId::from("CT1"),
                            instances: vec![],
                        },
                    ],
                },
                &["s1"],
            ),
        ]);
        let summary = resolve(&mut index, &instances);
        assert_eq!(target(&index, "SR1").as_deref(), Some("PT1"));
        assert_eq!(summary.ambiguous.count, 1);
    }

    #[test]
    fn test_unresolved_reference_left_empty() {
        let (mut index, instances) = build(vec![entry(
            "RP1",
            Modality::RtPlan,
            RawReferences::Plan {
                structure_set: InstanceId::from("missing"),
            },
            &["rp"],
        )]);
        let summary = resolve(&mut index, &instances);
        assert_eq!(target(&index, "RP1"), None);
        assert_eq!(summary.unresolved.count, 1);
        assert!(summary.unresolved.examples[0].contains("RTPLAN RP1"));
    }

    #[test]
    fn test_self_reference_ignored() {
        let (mut index, instances) = build(vec![entry(
            "SEG1",
            Modality::Seg,
            RawReferences::Segmentation {
                series: Some(SeriesId::from("SEG1")),
                instances: vec![InstanceId::from("g1")],
            },
            &["g1"],
        )]);
        resolve(&mut index, &instances);
        assert_eq!(target(&index, "SEG1"), None);
    }

    #[test]
    fn test_frame_of_reference_fallback() {
        let mut ct = entry("CT1", Modality::Ct, RawReferences::None, &["c1"]);
        ct.frame_of_reference_id = Some(FrameOfReferenceId::from("FOR"));
        let mut pt = entry("PT1", Modality::Pt, RawReferences::None, &["p1"]);
        pt.frame_of_reference_id = Some(FrameOfReferenceId::from("FOR"));
        let mut other_pt = entry("PT2", Modality::Pt, RawReferences::None, &["p2"]);
        other_pt.frame_of_reference_id = Some(FrameOfReferenceId::from("FOR"));

        let (mut index, instances) = build(vec![ct, pt, other_pt]);
        let summary = resolve(&mut index, &instances);
        assert_eq!(target(&index, "PT1").as_deref(), Some("CT1"));
        assert_eq!(target(&index, "PT2").as_deref(), Some("CT1"));
        // anchors are never attached through the frame
        assert_eq!(target(&index, "CT1"), None);
        assert_eq!(summary.via_frame, 2);
        assert!(summary.unresolved.is_empty());
    }

    #[test]
    fn test_frame_shared_with_two_anchors_is_not_resolved() {
        let mut ct = entry("CT1", Modality::Ct, RawReferences::None, &["c1"]);
        ct.frame_of_reference_id = Some(FrameOfReferenceId::from("FOR"));
        let mut mr = entry("MR1", Modality::Mr, RawReferences::None, &["m1"]);
        mr.frame_of_reference_id = Some(FrameOfReferenceId::from("FOR"));
        let mut pt = entry("PT1", Modality::Pt, RawReferences::None, &["p1"]);
        pt.frame_of_reference_id = Some(FrameOfReferenceId::from("FOR"));

        let (mut index, instances) = build(vec![ct, mr, pt]);
        let summary = resolve(&mut index, &instances);
        assert_eq!(target(&index, "PT1"), None);
        assert_eq!(summary.ambiguous.count, 1);
        assert!(summary.ambiguous.examples[0].contains("picked none"));
    }

    #[test]
    fn test_frame_shared_without_anchor_is_not_resolved() {
        let mut pt = entry("PT1", Modality::Pt, RawReferences::None, &["p1"]);
        pt.frame_of_reference_id = Some(FrameOfReferenceId::from("F"));
        let mut seg = entry("SEG1", Modality::Seg, RawReferences::None, &["s1"]);
        seg.frame_of_reference_id = Some(FrameOfReferenceId::from("F"));

        let (mut index, instances) = build(vec![pt, seg]);
        let frames = FrameIndex::build(&index);
        let own = SeriesId::from("PT1");
        let sharing: Vec<&SeriesId> = frames.others(&FrameOfReferenceId::from("F"), &own).collect();
        assert_eq!(sharing, vec![&SeriesId::from("SEG1")]);

        let summary = resolve(&mut index, &instances);
        assert_eq!(target(&index, "PT1"), None);
        assert_eq!(target(&index, "SEG1"), None);
        assert_eq!(summary.via_frame, 0);
    }

    #[test]
    fn test_no_dangling_references() {
        let (mut index, instances) = build(vec![
            entry("CT1", Modality::Ct, RawReferences::None, &["c1"]),
            entry(
                "RS1",
                Modality::RtStruct,
                RawReferences::StructureSet {
                    target: StructureSetReference::Instance(InstanceId::from("c1")),
                },
                &["r1"],
            ),
            entry(
                "RS2",
                Modality::RtStruct,
                RawReferences::StructureSet {
                    target: StructureSetReference::Series(SeriesId::from("ABSENT")),
                },
                &["r2"],
            ),
        ]);
        resolve(&mut index, &instances);
        for e in index.entries() {
            if let Some(target) = &e.referenced_series_id {
                assert!(index.contains_series(target));
                assert_ne!(target, &e.series_id);
            }
        }
        assert_eq!(target(&index, "RS2"), None);
    }

    #[test]
    fn test_series_modality_lookup() {
        let (index, _) = build(vec![entry("CT1", Modality::Ct, RawReferences::None, &["c1"])]);
        assert_eq!(series_modality(&index, &SeriesId::from("CT1")), Some(&Modality::Ct));
        assert_eq!(series_modality(&index, &SeriesId::from("X")), None);
    }
}
