pub use anyhow::{ensure, Context, Result};
pub use bbox::{prelude::*, ImageSize, TLBR};
pub use getset::Getters;
pub use itertools::Itertools;
pub use std::borrow::Borrow;
pub use tch::{Device, IndexOp, Kind, Tensor};
pub use tch_tensor_like::TensorLike;
