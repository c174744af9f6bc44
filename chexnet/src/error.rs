//! Error types of the pipeline.
//!
//! [LoadError], [ResourceError] and [ConfigError] abort a run. [ImageLoadError]
//! concerns a single sample, which is skipped and counted by the batch loader.

use label::ParseLabelError;
use std::path::PathBuf;
use thiserror::Error;

/// Any error raised by this crate.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    ImageLoad(#[from] ImageLoadError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    /// Whether the error must abort the run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::ImageLoad(_))
    }
}

/// A metadata table or the image directory cannot be loaded.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed table '{}': {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("malformed table '{}' at line {line}: expect at least {expect} columns, but get {found}", .path.display())]
    ColumnCount {
        path: PathBuf,
        line: u64,
        expect: usize,
        found: usize,
    },
    #[error("malformed table '{}' at line {line}: invalid {column} '{value}'", .path.display())]
    InvalidField {
        path: PathBuf,
        line: u64,
        column: &'static str,
        value: String,
    },
    #[error("malformed table '{}' at line {line}: {source}", .path.display())]
    InvalidLabel {
        path: PathBuf,
        line: u64,
        #[source]
        source: ParseLabelError,
    },
    #[error("invalid image file pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
    #[error("image '{identifier}' resolves to multiple files: '{}' and '{}'", .first.display(), .second.display())]
    DuplicateImage {
        identifier: String,
        first: PathBuf,
        second: PathBuf,
    },
    #[error("no image records left after matching metadata against '{}'", .dir.display())]
    NoRecords { dir: PathBuf },
}

/// A single image cannot be read or decoded.
#[derive(Debug, Error)]
#[error("failed to load image '{}': {reason}", .path.display())]
pub struct ImageLoadError {
    pub path: PathBuf,
    pub reason: String,
}

impl ImageLoadError {
    pub fn new(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// The compute device failed, e.g. it ran out of memory.
#[derive(Debug, Error)]
#[error("device failure: {message}")]
pub struct ResourceError {
    pub message: String,
}

impl ResourceError {
    pub fn new(message: impl ToString) -> Self {
        Self {
            message: message.to_string(),
        }
    }

    /// Classify a libtorch error. Allocation failures and CUDA errors are
    /// resource errors, anything else is returned untouched.
    pub fn classify(err: tch::TchError) -> Result<Self, tch::TchError> {
        let message = err.to_string();
        let is_resource = ["out of memory", "CUDA error", "CUDNN_STATUS", "DefaultCPUAllocator"]
            .iter()
            .any(|pattern| message.contains(pattern));

        if is_resource {
            Ok(Self { message })
        } else {
            Err(err)
        }
    }

    /// Run a device computation and turn a panic into a resource error.
    ///
    /// The panicking tensor operations of tch report device failures this way.
    pub fn catch_unwind<T, F>(f: F) -> Result<T, Self>
    where
        F: FnOnce() -> T,
    {
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).map_err(|payload| {
            let message = payload
                .downcast_ref::<String>()
                .cloned()
                .or_else(|| payload.downcast_ref::<&str>().map(|msg| msg.to_string()))
                .unwrap_or_else(|| "unknown panic".into());
            Self { message }
        })
    }
}

/// An option has an invalid value.
#[derive(Debug, Error)]
#[error("invalid configuration '{field}': {reason}")]
pub struct ConfigError {
    pub field: &'static str,
    pub reason: String,
}

impl ConfigError {
    pub fn new(field: &'static str, reason: impl ToString) -> Self {
        Self {
            field,
            reason: reason.to_string(),
        }
    }
}

/// Return a [ConfigError] if the condition does not hold.
#[macro_export]
macro_rules! ensure_config {
    ($cond:expr, $field:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::error::ConfigError::new($field, format!($($arg)+)).into());
        }
    };
}
