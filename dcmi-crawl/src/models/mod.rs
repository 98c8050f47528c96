//! Domain types: identifiers, modalities, file records, series rows and reports

pub mod file_record;
pub mod ids;
pub mod modality;
pub mod report;
pub mod series_entry;

pub use file_record::{FileRecord, RawReferences, ReportedSeries, StructureSetReference};
pub use ids::{FrameOfReferenceId, InstanceId, PatientId, SeriesId, StudyId, SubSeriesId};
pub use modality::{Modality, ModalitySet};
pub use report::{CrawlReport, DiagnosticLog};
pub use series_entry::{InstanceIndex, SeriesEntry, SeriesIndex};
