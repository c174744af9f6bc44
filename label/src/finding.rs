use crate::ParseLabelError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use strum::{AsRefStr, Display, EnumCount, EnumIter, EnumString, IntoEnumIterator as _};

/// The number of finding categories, which is also the length of a [LabelVector](crate::LabelVector).
pub const NUM_FINDINGS: usize = Finding::COUNT;

/// A disease category.
///
/// The declaration order is the canonical order of label vectors and model outputs.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    AsRefStr,
    Display,
    EnumCount,
    EnumIter,
    EnumString,
    Serialize,
    Deserialize,
)]
pub enum Finding {
    Atelectasis,
    Cardiomegaly,
    Consolidation,
    Edema,
    Effusion,
    Emphysema,
    Fibrosis,
    Hernia,
    /// The bounding box table spells it "Infiltrate".
    #[strum(to_string = "Infiltration", serialize = "Infiltrate")]
    #[serde(alias = "Infiltrate")]
    Infiltration,
    Mass,
    Nodule,
    #[strum(to_string = "Pleural_Thickening")]
    #[serde(rename = "Pleural_Thickening")]
    PleuralThickening,
    Pneumonia,
    Pneumothorax,
}

impl Finding {
    /// The position of the finding in label vectors.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Get the finding at a label vector position.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::iter().nth(index)
    }

    /// Iterate over all findings in canonical order.
    pub fn all() -> impl Iterator<Item = Self> {
        Self::iter()
    }

    /// The name as written in the metadata tables.
    pub fn name(self) -> &'static str {
        match self {
            Self::Atelectasis => "Atelectasis",
            Self::Cardiomegaly => "Cardiomegaly",
            Self::Consolidation => "Consolidation",
            Self::Edema => "Edema",
            Self::Effusion => "Effusion",
            Self::Emphysema => "Emphysema",
            Self::Fibrosis => "Fibrosis",
            Self::Hernia => "Hernia",
            Self::Infiltration => "Infiltration",
            Self::Mass => "Mass",
            Self::Nodule => "Nodule",
            Self::PleuralThickening => "Pleural_Thickening",
            Self::Pneumonia => "Pneumonia",
            Self::Pneumothorax => "Pneumothorax",
        }
    }

    /// Parse a finding name, trimming surrounding whitespaces.
    pub fn parse_name(name: &str) -> Result<Self, ParseLabelError> {
        let name = name.trim();
        Self::from_str(name).map_err(|_| ParseLabelError::UnknownFinding(name.to_owned()))
    }
}
