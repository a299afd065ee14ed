//! Shared domain types.
//!
//! These types are kept lightweight and serializable so they can be:
//!
//! - parsed from CSV or JSON request bodies
//! - used in-memory during fitting and cross-validation
//! - embedded in serialized bundles

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Column carrying the exposure (policy-years) used as the GLM offset.
pub const EXPOSURE_COLUMN: &str = "exposure";

/// Column carrying the observed claim count.
pub const CLAIM_COUNT_COLUMN: &str = "claim_count";

/// Exposure is capped at one policy-year.
pub const MAX_EXPOSURE: f64 = 1.0;

/// Claim counts above this value are treated as data errors and capped.
pub const MAX_CLAIM_COUNT: f64 = 4.0;

/// Default categorical predictors of the motor liability frequency data.
pub const DEFAULT_CATEGORICAL: [&str; 4] = ["area", "vehicle_brand", "vehicle_gas", "region"];

/// Default numeric predictors of the motor liability frequency data.
pub const DEFAULT_NUMERIC: [&str; 5] = [
    "vehicle_power",
    "vehicle_age",
    "driver_age",
    "bonus_malus",
    "density",
];

/// A single predictor value as supplied by a caller.
///
/// JSON numbers become `Number`, JSON strings become `Text`. Anything else
/// (booleans, nulls, nested objects) is rejected at deserialization time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(v) => Some(*v),
            FieldValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Number(_) => None,
            FieldValue::Text(s) => Some(s),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Number(v) => write!(f, "{v}"),
            FieldValue::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

/// One raw input row keyed by predictor name (plus `exposure`).
pub type RawRow = BTreeMap<String, FieldValue>;

/// A normalized policy observation used for fitting.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub id: String,
    /// Predictor values keyed by column name (no exposure, no response).
    pub predictors: RawRow,
    /// Policy-years at risk, in `(0, MAX_EXPOSURE]`.
    pub exposure: f64,
    /// Observed claim count, in `[0, MAX_CLAIM_COUNT]`.
    pub claim_count: f64,
}

impl Observation {
    /// The row a caller would send to `Bundle::predict` for this policy.
    pub fn to_raw_row(&self) -> RawRow {
        let mut row = self.predictors.clone();
        row.insert(EXPOSURE_COLUMN.to_string(), FieldValue::Number(self.exposure));
        row
    }
}

/// Clamp exposure to the modelled range. Returns `None` if the value can never
/// be used as a log offset.
pub fn clamp_exposure(raw: f64) -> Option<f64> {
    if raw.is_finite() && raw > 0.0 {
        Some(raw.min(MAX_EXPOSURE))
    } else {
        None
    }
}

/// Clamp a claim count to the modelled range. Negative or non-finite counts are invalid.
pub fn clamp_claim_count(raw: f64) -> Option<f64> {
    if raw.is_finite() && raw >= 0.0 {
        Some(raw.min(MAX_CLAIM_COUNT))
    } else {
        None
    }
}
