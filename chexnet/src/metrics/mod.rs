//! Classification metrics and the evaluator.

mod binary;
mod evaluator;
mod report;

pub use binary::*;
pub use evaluator::*;
pub use report::*;
