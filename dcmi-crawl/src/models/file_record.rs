//! Per-file classification output

use super::ids::{FrameOfReferenceId, InstanceId, PatientId, SeriesId, StudyId, SubSeriesId};
use super::modality::Modality;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Identity and raw references of one scanned file
///
/// Created by the classifier, consumed and discarded by the aggregator.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub patient_id: PatientId,
    pub study_id: StudyId,
    pub series_id: SeriesId,
    pub sub_series_id: SubSeriesId,
    pub instance_id: InstanceId,
    pub modality: Modality,
    pub frame_of_reference_id: Option<FrameOfReferenceId>,
    pub file_path: PathBuf,
    pub raw_references: RawReferences,
}

/// RTSTRUCT reference: the series chain when present, else one contour image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureSetReference {
    Series(SeriesId),
    Instance(InstanceId),
}

/// One evidence series referenced by a structured report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportedSeries {
    pub series: SeriesId,
    #[serde(default)]
    pub instances: Vec<InstanceId>,
}

/// References extracted before resolution, shaped by modality
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawReferences {
    #[default]
    None,
    StructureSet {
        target: StructureSetReference,
    },
    Segmentation {
        #[serde(default)]
        series: Option<SeriesId>,
        #[serde(default)]
        instances: Vec<InstanceId>,
    },
    Dose {
        #[serde(default)]
        series: Option<SeriesId>,
        #[serde(default)]
        structure_set: Option<InstanceId>,
        #[serde(default)]
        plan: Option<InstanceId>,
    },
    Plan {
        structure_set: InstanceId,
    },
    Report {
        series: Vec<ReportedSeries>,
    },
}

impl RawReferences {
    pub fn is_empty(&self) -> bool {
        self.series_candidates().is_empty()
            && self.instance_tiers().iter().all(|tier| tier.is_empty())
    }

    /// Directly referenced series, in preference order
    pub fn series_candidates(&self) -> Vec<&SeriesId> {
        match self {
            Self::StructureSet {
                target: StructureSetReference::Series(series),
            } => vec![series],
            Self::Segmentation { series, .. } | Self::Dose { series, .. } => {
                series.iter().collect()
            }
            Self::Report { series } => series.iter().map(|s| &s.series).collect(),
            Self::None
            | Self::StructureSet {
                target: StructureSetReference::Instance(_),
            }
            | Self::Plan { .. } => Vec::new(),
        }
    }

    /// Referenced instances grouped into priority tiers
    ///
    /// The first tier that resolves to any existing series decides. A dose's
    /// structure-set reference outranks its plan reference.
    pub fn instance_tiers(&self) -> Vec<Vec<&InstanceId>> {
        match self {
            Self::StructureSet {
                target: StructureSetReference::Instance(instance),
            } => vec![vec![instance]],
            Self::Segmentation { instances, .. } => vec![instances.iter().collect()],
            Self::Dose {
                structure_set,
                plan,
                ..
            } => vec![structure_set.iter().collect(), plan.iter().collect()],
            Self::Plan { structure_set } => vec![vec![structure_set]],
            Self::Report { series } => {
                vec![series.iter().flat_map(|s| s.instances.iter()).collect()]
            }
            Self::None
            | Self::StructureSet {
                target: StructureSetReference::Series(_),
            } => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dose_tiers_put_structure_set_first() {
        let refs = RawReferences::Dose {
            series: None,
            structure_set: Some(InstanceId::from("rs")),
            plan: Some(InstanceId::from("rp")),
        };
        let tiers = refs.instance_tiers();
        assert_eq!(tiers.len(), 2);
        assert_eq!(tiers[0], vec![&InstanceId::from("rs")]);
        assert_eq!(tiers[1], vec![&InstanceId::from("rp")]);
        assert!(refs.series_candidates().is_empty());
        assert!(!refs.is_empty());
    }

    #[test]
    fn test_empty_shapes() {
        assert!(RawReferences::None.is_empty());
        let seg = RawReferences::Segmentation {
            series: None,
            instances: Vec::new(),
        };
        assert!(seg.is_empty());
    }

    #[test]
    fn test_report_keeps_every_series() {
        let refs = RawReferences::Report {
            series: vec![
                ReportedSeries {
                    series: SeriesId::from("a"),
                    instances: vec![InstanceId::from("a1")],
                },
                ReportedSeries {
                    series: SeriesId::from("b"),
                    instances: vec![InstanceId::from("b1"), InstanceId::from("b2")],
                },
            ],
        };
        assert_eq!(refs.series_candidates().len(), 2);
        assert_eq!(refs.instance_tiers()[0].len(), 3);
    }

    #[test]
    fn test_tagged_json_shape() {
        let refs = RawReferences::Plan {
            structure_set: InstanceId::from("1.2"),
        };
        let json = serde_json::to_value(&refs).unwrap();
        assert_eq!(json["kind"], "plan");
        assert_eq!(json["structure_set"], "1.2");
    }
}
