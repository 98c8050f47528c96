//! Identifier newtypes
//!
//! Every DICOM UID kind gets its own type so a series id can never be
//! handed to something expecting an instance id.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

macro_rules! uid_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

uid_type!(
    /// PatientID (0010,0020)
    PatientId
);
uid_type!(
    /// StudyInstanceUID (0020,000D)
    StudyId
);
uid_type!(
    /// SeriesInstanceUID (0020,000E)
    SeriesId
);
uid_type!(
    /// AcquisitionNumber (0020,0012), splitting one series into independent acquisitions
    SubSeriesId
);
uid_type!(
    /// SOPInstanceUID (0008,0018), one per file
    InstanceId
);
uid_type!(
    /// FrameOfReferenceUID (0020,0052)
    FrameOfReferenceId
);

impl SubSeriesId {
    /// Sub-series used when a file carries no acquisition number
    pub const DEFAULT: &'static str = "1";
}

impl Default for SubSeriesId {
    fn default() -> Self {
        Self::new(Self::DEFAULT)
    }
}
