//! Fixture tag maps and on-disk datasets

use super::fake_reader::{FakeFile, FakeTagReader};
use dcmi_crawl::services::{Field, TagMap};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Identity fields shared by every fixture file
pub fn image(modality: &str, series: &str, instance: &str) -> TagMap {
    TagMap::new()
        .with_text(Field::PatientId, "PAT-1")
        .with_text(Field::StudyInstanceUid, "1.2.840.1")
        .with_text(Field::SeriesInstanceUid, series)
        .with_text(Field::SopInstanceUid, instance)
        .with_text(Field::Modality, modality)
}

/// RTSTRUCT referencing `target_series` through the frame-of-reference chain
pub fn structure_set(series: &str, instance: &str, target_series: &str) -> TagMap {
    let referenced_series = TagMap::new().with_text(Field::SeriesInstanceUid, target_series);
    let study = TagMap::new().with_items(Field::RtReferencedSeriesSequence, vec![referenced_series]);
    let frame = TagMap::new()
        .with_text(Field::FrameOfReferenceUid, "1.2.840.9")
        .with_items(Field::RtReferencedStudySequence, vec![study]);
    image("RTSTRUCT", series, instance).with_items(Field::ReferencedFrameOfReferenceSequence, vec![frame])
}

/// RTPLAN referencing one structure set instance
pub fn plan(series: &str, instance: &str, structure_set_instance: &str) -> TagMap {
    image("RTPLAN", series, instance).with_items(
        Field::ReferencedStructureSetSequence,
        vec![sop(structure_set_instance)],
    )
}

/// RTDOSE referencing a plan instance and a structure set instance
pub fn dose(series: &str, instance: &str, plan_instance: &str, structure_set_instance: &str) -> TagMap {
    image("RTDOSE", series, instance)
        .with_items(Field::ReferencedRtPlanSequence, vec![sop(plan_instance)])
        .with_items(
            Field::ReferencedStructureSetSequence,
            vec![sop(structure_set_instance)],
        )
}

/// SEG referencing source instances only
pub fn segmentation(series: &str, instance: &str, sources: &[&str]) -> TagMap {
    image("SEG", series, instance).with_items(
        Field::SourceImageSequence,
        sources.iter().map(|s| sop(s)).collect(),
    )
}

fn sop(instance: &str) -> TagMap {
    TagMap::new().with_text(Field::ReferencedSopInstanceUid, instance)
}

/// Files on disk plus the tags the fake reader serves for them
pub struct Dataset {
    pub root: PathBuf,
    files: HashMap<PathBuf, FakeFile>,
}

impl Dataset {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            files: HashMap::new(),
        }
    }

    pub fn add(&mut self, relative: &str, file: FakeFile) -> PathBuf {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        write_dicm_file(&path);
        self.files.insert(path.clone(), file);
        path
    }

    pub fn add_tags(&mut self, relative: &str, tags: TagMap) -> PathBuf {
        self.add(relative, FakeFile::Tags(tags))
    }

    pub fn reader(&self) -> FakeTagReader {
        FakeTagReader::new(self.files.clone())
    }
}

/// CT `S1` (3 instances), RTSTRUCT `S2` → `S1`, RTPLAN `S3` → `S2`,
/// RTDOSE `S4` → plan `S3` and structure set `S2`
pub fn scenario(root: &Path) -> Dataset {
    let mut dataset = Dataset::new(root);
    for n in 1..=3 {
        dataset.add_tags(
            &format!("PAT-1/CT/ct{}.dcm", n),
            image("CT", "S1", &format!("1.1.{}", n)),
        );
    }
    dataset.add_tags("PAT-1/RTSTRUCT/rs.dcm", structure_set("S2", "2.1", "S1"));
    dataset.add_tags("PAT-1/RTPLAN/rp.dcm", plan("S3", "3.1", "2.1"));
    dataset.add_tags("PAT-1/RTDOSE/rd.dcm", dose("S4", "4.1", "3.1", "2.1"));
    dataset
}

/// Minimal Part 10 preamble so header checks pass
pub fn write_dicm_file(path: &Path) {
    let mut bytes = vec![0u8; 128];
    bytes.extend_from_slice(b"DICM");
    bytes.extend_from_slice(&[0u8; 8]);
    fs::write(path, bytes).unwrap();
}
