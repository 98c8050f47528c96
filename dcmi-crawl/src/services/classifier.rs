//! File classification
//!
//! Turns a raw [`TagMap`] into a [`FileRecord`]: identity fields plus the
//! modality-specific references. Pure; all I/O happens in the tag reader.

use super::tag_reader::{Field, TagMap};
use crate::models::{
    FileRecord, FrameOfReferenceId, InstanceId, Modality, PatientId, RawReferences,
    ReportedSeries, SeriesId, StructureSetReference, StudyId, SubSeriesId,
};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Top-level fields requested from the tag reader
pub const REQUESTED_FIELDS: [Field; 19] = [
    Field::PatientId,
    Field::StudyInstanceUid,
    Field::SeriesInstanceUid,
    Field::SopInstanceUid,
    Field::Modality,
    Field::AcquisitionNumber,
    Field::FrameOfReferenceUid,
    Field::ReferencedFrameOfReferenceSequence,
    Field::RtReferencedStudySequence,
    Field::RtReferencedSeriesSequence,
    Field::ContourImageSequence,
    Field::ReferencedSeriesSequence,
    Field::ReferencedInstanceSequence,
    Field::SourceImageSequence,
    Field::ReferencedRtPlanSequence,
    Field::ReferencedStructureSetSequence,
    Field::CurrentRequestedProcedureEvidenceSequence,
    Field::PertinentOtherEvidenceSequence,
    Field::ReferencedSopSequence,
];

/// Per-file classification errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClassifyError {
    /// A mandatory identity field is absent or blank
    #[error("{path}: missing {field}")]
    MissingField { path: PathBuf, field: &'static str },
}

/// Build the record for one file
pub fn classify(tags: &TagMap, path: &Path) -> Result<FileRecord, ClassifyError> {
    let required = |field: Field| {
        tags.text(field).ok_or_else(|| ClassifyError::MissingField {
            path: path.to_path_buf(),
            field: field.keyword(),
        })
    };

    let series_id = SeriesId::from(required(Field::SeriesInstanceUid)?);
    let modality = Modality::parse(required(Field::Modality)?);
    let instance_id = InstanceId::from(required(Field::SopInstanceUid)?);

    let sub_series_id = tags
        .text(Field::AcquisitionNumber)
        .map(SubSeriesId::from)
        .unwrap_or_default();

    let mut frame_of_reference_id = tags.text(Field::FrameOfReferenceUid).map(FrameOfReferenceId::from);

    let raw_references = match modality {
        Modality::RtStruct => {
            if frame_of_reference_id.is_none() {
                frame_of_reference_id = tags
                    .first_item(Field::ReferencedFrameOfReferenceSequence)
                    .and_then(|item| item.text(Field::FrameOfReferenceUid))
                    .map(FrameOfReferenceId::from);
            }
            structure_set_references(tags)
        }
        Modality::Seg => segmentation_references(tags),
        Modality::RtDose => dose_references(tags),
        Modality::RtPlan => plan_references(tags),
        Modality::Sr => report_references(tags),
        Modality::Ct | Modality::Mr | Modality::Pt | Modality::Other(_) => RawReferences::None,
    };

    Ok(FileRecord {
        patient_id: PatientId::from(tags.text(Field::PatientId).unwrap_or_default()),
        study_id: StudyId::from(tags.text(Field::StudyInstanceUid).unwrap_or_default()),
        series_id,
        sub_series_id,
        instance_id,
        modality,
        frame_of_reference_id,
        file_path: path.to_path_buf(),
        raw_references,
    })
}

/// RTSTRUCT: ReferencedFrameOfReference > RTReferencedStudy > RTReferencedSeries,
/// falling back to the first contour image instance under that chain
fn structure_set_references(tags: &TagMap) -> RawReferences {
    let referenced_series: Vec<&TagMap> = tags
        .items(Field::ReferencedFrameOfReferenceSequence)
        .iter()
        .flat_map(|frame| frame.items(Field::RtReferencedStudySequence))
        .flat_map(|study| study.items(Field::RtReferencedSeriesSequence))
        .collect();

    if let Some(series) = referenced_series
        .first()
        .and_then(|item| item.text(Field::SeriesInstanceUid))
    {
        return RawReferences::StructureSet {
            target: StructureSetReference::Series(SeriesId::from(series)),
        };
    }

    let contour_instance = referenced_series
        .iter()
        .flat_map(|series| series.items(Field::ContourImageSequence))
        .chain(tags.items(Field::ContourImageSequence))
        .find_map(|image| image.text(Field::ReferencedSopInstanceUid));

    match contour_instance {
        Some(instance) => RawReferences::StructureSet {
            target: StructureSetReference::Instance(InstanceId::from(instance)),
        },
        None => RawReferences::None,
    }
}

/// SEG: referenced series id plus every referenced instance
fn segmentation_references(tags: &TagMap) -> RawReferences {
    let referenced_series = tags.items(Field::ReferencedSeriesSequence);

    let series = referenced_series
        .first()
        .and_then(|item| item.text(Field::SeriesInstanceUid))
        .map(SeriesId::from);

    let mut instances: Vec<InstanceId> = referenced_series
        .iter()
        .flat_map(|item| item.items(Field::ReferencedInstanceSequence))
        .filter_map(|item| item.text(Field::ReferencedSopInstanceUid))
        .map(InstanceId::from)
        .collect();

    if instances.is_empty() {
        instances = tags
            .items(Field::SourceImageSequence)
            .iter()
            .filter_map(|item| item.text(Field::ReferencedSopInstanceUid))
            .map(InstanceId::from)
            .collect();
    }
    dedup_in_order(&mut instances);

    if series.is_none() && instances.is_empty() {
        return RawReferences::None;
    }
    RawReferences::Segmentation { series, instances }
}

/// RTDOSE: plan, structure set and series references, all kept
fn dose_references(tags: &TagMap) -> RawReferences {
    let first_instance = |field: Field| {
        tags.first_item(field)
            .and_then(|item| item.text(Field::ReferencedSopInstanceUid))
            .map(InstanceId::from)
    };

    let plan = first_instance(Field::ReferencedRtPlanSequence);
    let structure_set = first_instance(Field::ReferencedStructureSetSequence);
    let series = tags
        .first_item(Field::ReferencedSeriesSequence)
        .and_then(|item| item.text(Field::SeriesInstanceUid))
        .map(SeriesId::from);

    if plan.is_none() && structure_set.is_none() && series.is_none() {
        return RawReferences::None;
    }
    RawReferences::Dose {
        series,
        structure_set,
        plan,
    }
}

/// RTPLAN: one structure set instance
fn plan_references(tags: &TagMap) -> RawReferences {
    tags.first_item(Field::ReferencedStructureSetSequence)
        .and_then(|item| item.text(Field::ReferencedSopInstanceUid))
        .map(|instance| RawReferences::Plan {
            structure_set: InstanceId::from(instance),
        })
        .unwrap_or_default()
}

/// SR: every evidence series with its instances
fn report_references(tags: &TagMap) -> RawReferences {
    let mut reported: Vec<ReportedSeries> = Vec::new();

    let evidence = tags
        .items(Field::CurrentRequestedProcedureEvidenceSequence)
        .iter()
        .chain(tags.items(Field::PertinentOtherEvidenceSequence));

    for study in evidence {
        for series_item in study.items(Field::ReferencedSeriesSequence) {
            let Some(series) = series_item.text(Field::SeriesInstanceUid) else {
                continue;
            };
            let instances = series_item
                .items(Field::ReferencedSopSequence)
                .iter()
                .filter_map(|sop| sop.text(Field::ReferencedSopInstanceUid))
                .map(InstanceId::from);

            match reported.iter_mut().find(|r| r.series.as_str() == series) {
                Some(existing) => existing.instances.extend(instances),
                None => reported.push(ReportedSeries {
                    series: SeriesId::from(series),
                    instances: instances.collect(),
                }),
            }
        }
    }

    for r in &mut reported {
        dedup_in_order(&mut r.instances);
    }

    if reported.is_empty() {
        RawReferences::None
    } else {
        RawReferences::Report { series: reported }
    }
}

fn dedup_in_order(ids: &mut Vec<InstanceId>) {
    let mut seen = std::collections::HashSet::new();
    ids.retain(|id| seen.insert(id.clone()));
}
