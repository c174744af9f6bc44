//! Finding categories of the NIH chest X-ray dataset and their multi-label encoding.

mod finding;
mod label_set;

pub use finding::*;
pub use label_set::*;

use thiserror::Error;

/// The text used by the dataset for images without any finding.
pub const NO_FINDING: &str = "No Finding";

/// The error raised when decoding a label string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseLabelError {
    #[error("unknown finding '{0}'")]
    UnknownFinding(String),
    #[error("'No Finding' cannot be combined with other findings in '{0}'")]
    MixedNoFinding(String),
}
