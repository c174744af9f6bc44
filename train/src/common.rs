//! Common imports from external crates.

pub use anyhow::{bail, ensure, format_err, Context, Error, Result};
pub use chexnet::{
    dataset::{BatchLoader, BatchLoaderInit, ChestXrayDataset, EpochBatches},
    loss::{MultiLabelLoss, MultiLabelLossInit},
    metrics::{EvaluationReport, Evaluator, Thresholds},
    model::{ChexNet, ChexNetInit},
    ConfigError, Mode, ResourceError,
};
pub use chrono::{DateTime, Local};
pub use futures::{future, future::FutureExt as _};
pub use indexmap::IndexMap;
pub use itertools::Itertools as _;
pub use label::{Finding, NUM_FINDINGS};
pub use noisy_float::prelude::*;
pub use serde::{Deserialize, Serialize};
pub use std::{
    borrow::Cow,
    fmt::Debug,
    future::Future,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};
pub use structopt::StructOpt;
pub use tch::{
    nn::{self, OptimizerConfig as _},
    Device, Kind, Tensor,
};
pub use tfrecord::{EventWriter, EventWriterInit};
pub use tokio::sync::broadcast;
pub use tracing::{debug, error, info, info_span, warn, Instrument};

pub type Fallible<T> = Result<T, Error>;
