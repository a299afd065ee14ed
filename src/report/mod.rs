//! Plain-text reporting for the terminal.
//!
//! Formatting lives here so the fitting, store and CV code only return data.

pub mod format;

pub use format::{format_cv_summary, format_model, format_versions};
