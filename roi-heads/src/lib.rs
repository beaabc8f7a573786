//! The region-of-interest stage of two-stage detectors.
//!
//! Proposals are matched against the ground truth, the matched instance masks
//! are rasterized into fixed-size targets and the per-task heads are chained
//! into one pipeline.

mod common;
pub mod config;
pub mod heads;
pub mod loss;
pub mod matcher;
pub mod profiling;
pub mod structures;

pub use config::Config;
pub use heads::{build_roi_heads, CombinedRoiHeads};
pub use loss::{make_roi_mask_loss_evaluator, MaskRcnnLossComputation};
