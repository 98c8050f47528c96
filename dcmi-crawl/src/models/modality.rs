//! Modality classification

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Acquisition or derived-object type (0008,0060)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Modality {
    Ct,
    Mr,
    Pt,
    RtStruct,
    RtDose,
    RtPlan,
    Seg,
    Sr,
    Other(String),
}

impl Modality {
    /// Parse a modality code, case-insensitively
    pub fn parse(code: &str) -> Self {
        let code = code.trim().to_ascii_uppercase();
        match code.as_str() {
            "CT" => Self::Ct,
            "MR" => Self::Mr,
            "PT" => Self::Pt,
            "RTSTRUCT" => Self::RtStruct,
            "RTDOSE" => Self::RtDose,
            "RTPLAN" => Self::RtPlan,
            "SEG" => Self::Seg,
            "SR" => Self::Sr,
            _ => Self::Other(code),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Ct => "CT",
            Self::Mr => "MR",
            Self::Pt => "PT",
            Self::RtStruct => "RTSTRUCT",
            Self::RtDose => "RTDOSE",
            Self::RtPlan => "RTPLAN",
            Self::Seg => "SEG",
            Self::Sr => "SR",
            Self::Other(code) => code,
        }
    }

    /// Primary acquisition modalities; always forest roots
    pub fn is_anchor(&self) -> bool {
        matches!(self, Self::Ct | Self::Mr)
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Modality {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<String> for Modality {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<Modality> for String {
    fn from(value: Modality) -> Self {
        value.as_str().to_string()
    }
}

/// Requested modality set for branch queries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModalitySet(BTreeSet<Modality>);

impl ModalitySet {
    /// Parse a comma-separated list such as `"CT,RTSTRUCT"`; blanks are skipped
    pub fn parse_list(list: &str) -> Self {
        Self(
            list.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(Modality::parse)
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, modality: &Modality) -> bool {
        self.0.contains(modality)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Modality> {
        self.0.iter()
    }

    /// True when every requested modality appears in `present`
    pub fn is_covered_by<'a>(&self, present: impl IntoIterator<Item = &'a Modality>) -> bool {
        let present: BTreeSet<&Modality> = present.into_iter().collect();
        self.0.iter().all(|m| present.contains(m))
    }
}

impl FromIterator<Modality> for ModalitySet {
    fn from_iter<I: IntoIterator<Item = Modality>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for ModalitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let codes: Vec<&str> = self.0.iter().map(Modality::as_str).collect();
        f.write_str(&codes.join(","))
    }
}
