//! Batched geometry types backed by tensors.

mod box_list;
mod tlbr;

pub use box_list::*;
pub use tlbr::*;
