//! Mask target generation and loss functions.

mod bce_with_logits_loss;
mod mask_loss;

pub use bce_with_logits_loss::*;
pub use mask_loss::*;
