//! Tensor helpers and batched box types shared by the ROI heads.

mod common;
pub mod compound_tensor;
pub mod tensor;

pub use compound_tensor::*;
pub use tensor::*;
pub use tch_tensor_like::TensorLike;
