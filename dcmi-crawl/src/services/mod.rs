//! Per-file services: discovery, tag reading and classification

pub mod classifier;
pub mod file_scanner;
pub mod tag_reader;

pub use classifier::{classify, ClassifyError, REQUESTED_FIELDS};
pub use file_scanner::{FileScanner, ScanError, ScanResult};
pub use tag_reader::{DicomTagReader, Field, TagMap, TagReadError, TagReader, TagValue};
