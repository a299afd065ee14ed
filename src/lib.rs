//! `claim-freq` library crate.
//!
//! The binary (`cfreq`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - the bundle, store and service are usable from other tools
//!
//! Flow: `data` -> `preprocess` + `glm` (wrapped in `bundle`) -> `cv` ->
//! `store` -> `serve`.

pub mod app;
pub mod bundle;
pub mod cli;
pub mod cv;
pub mod data;
pub mod domain;
pub mod error;
pub mod glm;
pub mod math;
pub mod preprocess;
pub mod report;
pub mod serve;
pub mod store;
