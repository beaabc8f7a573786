pub use anyhow::{bail, ensure, format_err, Context as _, Error, Result};
pub use bbox::{prelude::*, ImageSize, Transform, HW, TLBR};
pub use indexmap::IndexMap;
pub use itertools::{izip, Itertools as _};
pub use lazy_static::lazy_static;
pub use log::{debug, info, warn};
pub use ndarray::{s, Array2};
pub use noisy_float::prelude::*;
pub use serde::{Deserialize, Serialize};
pub use std::{
    collections::HashSet,
    fmt::Debug,
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};
pub use tch::{kind::FLOAT_CPU, Device, IndexOp, Kind, Reduction, Tensor};
pub use tch_goodies::{BoxList, TensorExt as _, TensorLike as _};
