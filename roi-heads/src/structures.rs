//! Per-image proposal, ground truth and instance mask containers.

mod ground_truth;
mod proposal;
mod segmentation_mask;

pub use ground_truth::*;
pub use proposal::*;
pub use segmentation_mask::*;
