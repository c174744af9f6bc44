//! The classifier model.

mod densenet;
mod model;

pub use densenet::*;
pub use model::*;
