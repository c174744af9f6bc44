//! The building blocks of the chest X-ray multi-label classifier.

mod common;
pub mod dataset;
pub mod error;
pub mod loss;
pub mod metrics;
pub mod mode;
pub mod model;
pub mod processor;

pub use error::{ConfigError, Error, ImageLoadError, LoadError, ResourceError};
pub use mode::Mode;
