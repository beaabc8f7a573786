//! The per-task ROI heads and their composition.

mod combined;
mod mask_head;
mod post_processor;
mod stage;

pub use combined::*;
pub use mask_head::*;
pub use post_processor::*;
pub use stage::*;
