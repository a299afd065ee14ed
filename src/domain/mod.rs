//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - raw predictor values and rows as they arrive over the wire (`FieldValue`, `RawRow`)
//! - normalized policy observations used for fitting (`Observation`)
//! - the default column layout of the claim-frequency data set

pub mod types;

pub use types::*;
