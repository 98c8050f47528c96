//! DICOM tag access
//!
//! [`TagReader`] is the seam between the crawler and the DICOM parsing
//! library. Readers return a [`TagMap`]: the requested fields as text, with
//! sequences kept as nested item maps so reference chains can be walked
//! without touching the library again.

use dicom_object::{InMemDicomObject, OpenFileOptions, Tag};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Tag reading errors
#[derive(Debug, Error)]
pub enum TagReadError {
    /// File could not be parsed as DICOM
    #[error("Unreadable file {0}: {1}")]
    Unreadable(PathBuf, String),
}

/// Identifying and reference attributes the crawler understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    PatientId,
    StudyInstanceUid,
    SeriesInstanceUid,
    SopInstanceUid,
    Modality,
    AcquisitionNumber,
    FrameOfReferenceUid,
    ReferencedSopInstanceUid,
    ReferencedFrameOfReferenceSequence,
    RtReferencedStudySequence,
    RtReferencedSeriesSequence,
    ContourImageSequence,
    ReferencedSeriesSequence,
    ReferencedInstanceSequence,
    SourceImageSequence,
    ReferencedRtPlanSequence,
    ReferencedStructureSetSequence,
    CurrentRequestedProcedureEvidenceSequence,
    PertinentOtherEvidenceSequence,
    ReferencedSopSequence,
}

impl Field {
    pub const ALL: [Field; 20] = [
        Field::PatientId,
        Field::StudyInstanceUid,
        Field::SeriesInstanceUid,
        Field::SopInstanceUid,
        Field::Modality,
        Field::AcquisitionNumber,
        Field::FrameOfReferenceUid,
        Field::ReferencedSopInstanceUid,
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

    pub fn tag(self) -> Tag {
        match self {
            Field::PatientId => Tag(0x0010, 0x0020),
            Field::StudyInstanceUid => Tag(0x0020, 0x000D),
            Field::SeriesInstanceUid => Tag(0x0020, 0x000E),
            Field::SopInstanceUid => Tag(0x0008, 0x0018),
            Field::Modality => Tag(0x0008, 0x0060),
            Field::AcquisitionNumber => Tag(0x0020, 0x0012),
            Field::FrameOfReferenceUid => Tag(0x0020, 0x0052),
            Field::ReferencedSopInstanceUid => Tag(0x0008, 0x1155),
            Field::ReferencedFrameOfReferenceSequence => Tag(0x3006, 0x0010),
            Field::RtReferencedStudySequence => Tag(0x3006, 0x0012),
            Field::RtReferencedSeriesSequence => Tag(0x3006, 0x0014),
            Field::ContourImageSequence => Tag(0x3006, 0x0016),
            Field::ReferencedSeriesSequence => Tag(0x0008, 0x1115),
            Field::ReferencedInstanceSequence => Tag(0x0008, 0x114A),
            Field::SourceImageSequence => Tag(0x0008, 0x2112),
            Field::ReferencedRtPlanSequence => Tag(0x300C, 0x0002),
            Field::ReferencedStructureSetSequence => Tag(0x300C, 0x0060),
            Field::CurrentRequestedProcedureEvidenceSequence => Tag(0x0040, 0xA375),
            Field::PertinentOtherEvidenceSequence => Tag(0x0040, 0xA385),
            Field::ReferencedSopSequence => Tag(0x0008, 0x1199),
        }
    }

    /// DICOM keyword, used in log messages
    pub fn keyword(self) -> &'static str {
        match self {
            Field::PatientId => "PatientID",
            Field::StudyInstanceUid => "StudyInstanceUID",
            Field::SeriesInstanceUid => "SeriesInstanceUID",
            Field::SopInstanceUid => "SOPInstanceUID",
            Field::Modality => "Modality",
            Field::AcquisitionNumber => "AcquisitionNumber",
            Field::FrameOfReferenceUid => "FrameOfReferenceUID",
            Field::ReferencedSopInstanceUid => "ReferencedSOPInstanceUID",
            Field::ReferencedFrameOfReferenceSequence => "ReferencedFrameOfReferenceSequence",
            Field::RtReferencedStudySequence => "RTReferencedStudySequence",
            Field::RtReferencedSeriesSequence => "RTReferencedSeriesSequence",
            Field::ContourImageSequence => "ContourImageSequence",
            Field::ReferencedSeriesSequence => "ReferencedSeriesSequence",
            Field::ReferencedInstanceSequence => "ReferencedInstanceSequence",
            Field::SourceImageSequence => "SourceImageSequence",
            Field::ReferencedRtPlanSequence => "ReferencedRTPlanSequence",
            Field::ReferencedStructureSetSequence => "ReferencedStructureSetSequence",
            Field::CurrentRequestedProcedureEvidenceSequence => {
                "CurrentRequestedProcedureEvidenceSequence"
            }
            Field::PertinentOtherEvidenceSequence => "PertinentOtherEvidenceSequence",
            Field::ReferencedSopSequence => "ReferencedSOPSequence",
        }
    }

    pub fn is_sequence(self) -> bool {
        self.keyword().ends_with("Sequence")
    }
}

/// Value of one attribute
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    Text(String),
    Sequence(Vec<TagMap>),
}

/// Field → value map for one file or one sequence item
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagMap(BTreeMap<Field, TagValue>);

impl TagMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style text insert
    pub fn with_text(mut self, field: Field, value: impl Into<String>) -> Self {
        self.insert_text(field, value);
        self
    }

    /// Builder-style sequence insert
    pub fn with_items(mut self, field: Field, items: Vec<TagMap>) -> Self {
        self.0.insert(field, TagValue::Sequence(items));
        self
    }

    pub fn insert_text(&mut self, field: Field, value: impl Into<String>) {
        self.0.insert(field, TagValue::Text(value.into()));
    }

    pub fn insert_items(&mut self, field: Field, items: Vec<TagMap>) {
        self.0.insert(field, TagValue::Sequence(items));
    }

    /// Trimmed, non-empty text value
    pub fn text(&self, field: Field) -> Option<&str> {
        match self.0.get(&field) {
            Some(TagValue::Text(value)) => {
                let value = value.trim_matches(|c: char| c == '\0' || c.is_whitespace());
                (!value.is_empty()).then_some(value)
            }
            _ => None,
        }
    }

    /// Items of a sequence (empty when absent)
    pub fn items(&self, field: Field) -> &[TagMap] {
        match self.0.get(&field) {
            Some(TagValue::Sequence(items)) => items,
            _ => &[],
        }
    }

    pub fn first_item(&self, field: Field) -> Option<&TagMap> {
        self.items(field).first()
    }
}

/// Reads identifying fields from one file
///
/// Implementations are shared across classification workers.
pub trait TagReader: Send + Sync {
    fn read(&self, path: &Path, fields: &[Field]) -> Result<TagMap, TagReadError>;
}

/// Maximum sequence nesting followed when reading
const MAX_SEQUENCE_DEPTH: usize = 6;

/// [`TagReader`] backed by `dicom-object`; parsing stops before pixel data
#[derive(Debug, Default, Clone)]
pub struct DicomTagReader;

impl DicomTagReader {
    pub fn new() -> Self {
        Self
    }

    fn collect(object: &InMemDicomObject, fields: &[Field], depth: usize) -> TagMap {
        let mut map = TagMap::new();
        for &field in fields {
            let Ok(element) = object.element(field.tag()) else {
                continue;
            };

            if field.is_sequence() {
                if depth >= MAX_SEQUENCE_DEPTH {
                    continue;
                }
                if let Some(items) = element.items() {
                    let nested = items
                        .iter()
                        .map(|item| Self::collect(item, &Field::ALL, depth + 1))
                        .collect();
                    map.insert_items(field, nested);
                }
            } else if let Ok(text) = element.to_str() {
                map.insert_text(field, text.to_string());
            }
        }
        map
    }
}

impl TagReader for DicomTagReader {
    fn read(&self, path: &Path, fields: &[Field]) -> Result<TagMap, TagReadError> {
        let object = OpenFileOptions::new()
            .read_until(Tag(0x7FE0, 0x0010))
            .open_file(path)
            .map_err(|e| TagReadError::Unreadable(path.to_path_buf(), e.to_string()))?;

        let tags = Self::collect(&object, fields, 0);
        tracing::trace!(file = %path.display(), fields = tags.0.len(), "Read tags");
        Ok(tags)
    }
}
