//! Aggregated series rows and the two index tables

use super::file_record::RawReferences;
use super::ids::{FrameOfReferenceId, InstanceId, PatientId, SeriesId, StudyId, SubSeriesId};
use super::modality::Modality;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

/// One (series, sub-series) row of the index
///
/// Scalars are copied from the first file of the group; `instances` grows with
/// every file. Only the reference resolver writes `referenced_series_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesEntry {
    pub series_id: SeriesId,
    pub sub_series_id: SubSeriesId,
    pub patient_id: PatientId,
    pub study_id: StudyId,
    pub modality: Modality,
    #[serde(with = "empty_as_none")]
    pub frame_of_reference_id: Option<FrameOfReferenceId>,
    /// Directory of the series relative to the crawl root
    pub folder: String,
    /// InstanceID → filename relative to `folder`
    pub instances: BTreeMap<InstanceId, String>,
    pub raw_references: RawReferences,
    #[serde(with = "empty_as_none")]
    pub referenced_series_id: Option<SeriesId>,
}

impl SeriesEntry {
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }
}

/// `SeriesID → SubSeriesID → SeriesEntry`
///
/// Deserialization rejects repeated keys at either level: a document that
/// names one series twice is corrupt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesIndex(
    #[serde(deserialize_with = "deserialize_nested_unique")]
    BTreeMap<SeriesId, BTreeMap<SubSeriesId, SeriesEntry>>,
);

impl SeriesIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_series(&self, series_id: &SeriesId) -> bool {
        self.0.contains_key(series_id)
    }

    pub fn series(&self, series_id: &SeriesId) -> Option<&BTreeMap<SubSeriesId, SeriesEntry>> {
        self.0.get(series_id)
    }

    pub fn get(&self, series_id: &SeriesId, sub_series_id: &SubSeriesId) -> Option<&SeriesEntry> {
        self.0.get(series_id).and_then(|subs| subs.get(sub_series_id))
    }

    pub fn get_mut(&mut self, series_id: &SeriesId, sub_series_id: &SubSeriesId) -> Option<&mut SeriesEntry> {
        self.0.get_mut(series_id).and_then(|subs| subs.get_mut(sub_series_id))
    }

    /// Insert a whole series group, replacing any previous one
    pub fn insert_series(&mut self, series_id: SeriesId, subs: BTreeMap<SubSeriesId, SeriesEntry>) {
        self.0.insert(series_id, subs);
    }

    /// All rows in (series, sub-series) order
    pub fn entries(&self) -> impl Iterator<Item = &SeriesEntry> {
        self.0.values().flat_map(|subs| subs.values())
    }

    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut SeriesEntry> {
        self.0.values_mut().flat_map(|subs| subs.values_mut())
    }

    pub fn series_count(&self) -> usize {
        self.0.len()
    }

    pub fn entry_count(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }

    pub fn instance_count(&self) -> usize {
        self.entries().map(SeriesEntry::instance_count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// `InstanceID → SeriesID`, immutable once aggregation finishes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceIndex(
    #[serde(deserialize_with = "deserialize_unique")] BTreeMap<InstanceId, SeriesId>,
);

impl InstanceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, instance_id: &InstanceId) -> Option<&SeriesId> {
        self.0.get(instance_id)
    }

    /// Record an instance; returns the previously recorded series if any
    pub fn insert(&mut self, instance_id: InstanceId, series_id: SeriesId) -> Option<SeriesId> {
        self.0.insert(instance_id, series_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&InstanceId, &SeriesId)> {
        self.0.iter()
    }
}

/// Optional identifiers persist as `""` when absent
mod empty_as_none {
    use super::*;

    pub fn serialize<T, S>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: fmt::Display,
        S: Serializer,
    {
        match value {
            Some(v) => serializer.collect_str(v),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        T: From<String>,
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.filter(|s| !s.is_empty()).map(T::from))
    }
}

struct UniqueMapVisitor<K, V>(PhantomData<(K, V)>);

impl<'de, K, V> Visitor<'de> for UniqueMapVisitor<K, V>
where
    K: Deserialize<'de> + Ord + fmt::Display,
    V: Deserialize<'de>,
{
    type Value = BTreeMap<K, V>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map with unique keys")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut map = BTreeMap::new();
        while let Some((key, value)) = access.next_entry::<K, V>()? {
            if map.contains_key(&key) {
                return Err(serde::de::Error::custom(format!("duplicate key {}", key)));
            }
            map.insert(key, value);
        }
        Ok(map)
    }
}

fn deserialize_unique<'de, D, K, V>(deserializer: D) -> Result<BTreeMap<K, V>, D::Error>
where
    D: Deserializer<'de>,
    K: Deserialize<'de> + Ord + fmt::Display,
    V: Deserialize<'de>,
{
    deserializer.deserialize_map(UniqueMapVisitor(PhantomData))
}

/// Inner sub-series maps are checked the same way
#[derive(Deserialize)]
struct UniqueSubSeries(
    #[serde(deserialize_with = "deserialize_unique")] BTreeMap<SubSeriesId, SeriesEntry>,
);

fn deserialize_nested_unique<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<SeriesId, BTreeMap<SubSeriesId, SeriesEntry>>, D::Error>
where
    D: Deserializer<'de>,
{
    let outer: BTreeMap<SeriesId, UniqueSubSeries> = deserialize_unique(deserializer)?;
    Ok(outer.into_iter().map(|(k, v)| (k, v.0)).collect())
}
