pub use crate::{
    error::{ConfigError, Error, ImageLoadError, LoadError, ResourceError},
    mode::Mode,
};
pub use futures::{
    future,
    future::FutureExt as _,
    stream::{self, Stream, StreamExt as _, TryStreamExt as _},
};
pub use indexmap::{IndexMap, IndexSet};
pub use itertools::{izip, Itertools as _};
pub use label::{Finding, LabelSet, LabelVector, NUM_FINDINGS};
pub use log::{debug, error, info, warn};
pub use noisy_float::prelude::*;
pub use par_stream::prelude::*;
pub use rand::prelude::*;
pub use serde::{Deserialize, Serialize};
pub use std::{
    borrow::{Borrow, Cow},
    cmp::{self, Ordering},
    collections::{HashMap, HashSet},
    fmt::{self, Debug},
    future::Future,
    iter,
    num::NonZeroUsize,
    ops::Range,
    path::{Path, PathBuf},
    pin::Pin,
    sync::{
        atomic::{self, AtomicUsize},
        Arc,
    },
};
pub use tch::{
    nn::{self, ModuleT as _, OptimizerConfig as _},
    Device, IndexOp as _, Kind, Reduction, Tensor,
};
pub use tch_tensor_like::TensorLike;
