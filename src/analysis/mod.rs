//! Analysis module - quality metrics, segmentation, normalization, whitening

mod statistics;
mod segment;
mod frame;
mod normalize;
mod whiten;
mod response;

pub use statistics::*;
pub use segment::*;
pub use frame::*;
pub use normalize::*;
pub use whiten::*;
pub use response::*;
