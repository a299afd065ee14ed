//! Data sources for model training.
//!
//! - CSV ingest + validation (`ingest`)
//! - deterministic synthetic portfolios (`sample`)

pub mod ingest;
pub mod sample;

pub use ingest::*;
pub use sample::*;
