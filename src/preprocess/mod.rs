//! Preprocessing pipeline: rare-level pooling, dummy coding and exposure offset.

pub mod encoder;
pub mod pipeline;

pub use encoder::*;
pub use pipeline::*;
