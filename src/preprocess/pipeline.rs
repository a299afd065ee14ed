//! Fitted preprocessing: raw rows to model-ready design matrices.
//!
//! The pipeline is fitted once on training observations and is immutable
//! afterwards. Transforming never looks at call-time data distributions, so
//! a row encodes the same way whether it is part of a large batch, a single
//! request, or the training set itself.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::domain::{
    DEFAULT_CATEGORICAL, DEFAULT_NUMERIC, EXPOSURE_COLUMN, FieldValue, MAX_EXPOSURE, Observation, RawRow,
};
use crate::error::{AppError, ErrorKind};
use crate::preprocess::encoder::CategoricalEncoder;

/// Default share below which a level is pooled into `other`.
pub const DEFAULT_OTHER_THRESHOLD: f64 = 0.05;

/// Default label of the pooled level.
pub const DEFAULT_OTHER_LABEL: &str = "other";

/// Which columns the pipeline consumes and how rare levels are pooled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub categorical: Vec<String>,
    pub numeric: Vec<String>,
    /// Levels whose training share is strictly below this are pooled.
    pub other_threshold: f64,
    pub other_label: String,
}

impl Default for PipelineSpec {
    fn default() -> Self {
        Self::with_columns(&DEFAULT_CATEGORICAL, &DEFAULT_NUMERIC)
    }
}

impl PipelineSpec {
    pub fn with_columns(categorical: &[&str], numeric: &[&str]) -> Self {
        Self {
            categorical: categorical.iter().map(|s| s.to_string()).collect(),
            numeric: numeric.iter().map(|s| s.to_string()).collect(),
            other_threshold: DEFAULT_OTHER_THRESHOLD,
            other_label: DEFAULT_OTHER_LABEL.to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if !(self.other_threshold.is_finite() && (0.0..1.0).contains(&self.other_threshold)) {
            return Err(AppError::new(
                ErrorKind::InvalidInput,
                format!("Other-level threshold must be in [0, 1), got {}", self.other_threshold),
            ));
        }
        if self.other_label.is_empty() {
            return Err(AppError::new(ErrorKind::InvalidInput, "Other-level label must not be empty."));
        }
        let mut seen = std::collections::HashSet::new();
        for name in self.categorical.iter().chain(self.numeric.iter()) {
            if name.is_empty() || name == EXPOSURE_COLUMN {
                return Err(AppError::new(
                    ErrorKind::InvalidInput,
                    format!("'{name}' cannot be used as a predictor column."),
                ));
            }
            if !seen.insert(name.as_str()) {
                return Err(AppError::new(
                    ErrorKind::InvalidInput,
                    format!("Predictor column '{name}' is listed twice."),
                ));
            }
        }
        Ok(())
    }
}

/// Model-ready features plus the log-exposure offset, one row per input.
#[derive(Debug, Clone)]
pub struct Design {
    /// `n × p` feature matrix (no intercept column).
    pub x: DMatrix<f64>,
    /// `ln(exposure)` per row.
    pub offset: DVector<f64>,
}

impl Design {
    pub fn n_rows(&self) -> usize {
        self.x.nrows()
    }
}

/// A fitted preprocessing pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    spec: PipelineSpec,
    encoders: Vec<CategoricalEncoder>,
    feature_names: Vec<String>,
}

impl Pipeline {
    /// Fit the pipeline on training observations.
    pub fn fit(spec: &PipelineSpec, observations: &[Observation]) -> Result<Self, AppError> {
        spec.validate()?;
        if observations.is_empty() {
            return Err(AppError::new(ErrorKind::InvalidInput, "Cannot fit a pipeline on zero rows."));
        }

        for name in &spec.numeric {
            for (i, obs) in observations.iter().enumerate() {
                read_numeric(&obs.predictors, name, i)?;
            }
        }

        let mut encoders = Vec::with_capacity(spec.categorical.len());
        for name in &spec.categorical {
            let mut values = Vec::with_capacity(observations.len());
            for (i, obs) in observations.iter().enumerate() {
                values.push(read_text(&obs.predictors, name, i)?);
            }
            encoders.push(CategoricalEncoder::fit(
                name,
                &values,
                spec.other_threshold,
                &spec.other_label,
            ));
        }

        let pipeline = Self::from_parts(spec.clone(), encoders)?;
        log::debug!(
            "fitted pipeline on {} rows: {} features",
            observations.len(),
            pipeline.feature_names.len()
        );
        Ok(pipeline)
    }

    /// Rebuild a pipeline from frozen parts (used when decoding bundles).
    pub fn from_parts(spec: PipelineSpec, encoders: Vec<CategoricalEncoder>) -> Result<Self, AppError> {
        spec.validate()?;
        let columns: Vec<&str> = encoders.iter().map(|e| e.column()).collect();
        let expected: Vec<&str> = spec.categorical.iter().map(String::as_str).collect();
        if columns != expected {
            return Err(AppError::new(
                ErrorKind::SchemaMismatch,
                "Categorical encoders do not match the pipeline's categorical columns.",
            ));
        }
        let mut feature_names = spec.numeric.clone();
        for enc in &encoders {
            feature_names.extend(enc.dummy_names());
        }
        Ok(Self {
            spec,
            encoders,
            feature_names,
        })
    }

    pub fn spec(&self) -> &PipelineSpec {
        &self.spec
    }

    pub fn encoders(&self) -> &[CategoricalEncoder] {
        &self.encoders
    }

    /// Output schema: feature names in design-matrix column order.
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Transform raw rows; each row must carry `exposure`.
    pub fn transform(&self, rows: &[RawRow]) -> Result<Design, AppError> {
        self.transform_with(rows.len(), |i| {
            let row = &rows[i];
            let exposure = read_numeric(row, EXPOSURE_COLUMN, i)?;
            Ok((row, exposure))
        })
    }

    /// Transform training observations (exposure taken from the observation).
    pub fn transform_observations(&self, observations: &[Observation]) -> Result<Design, AppError> {
        self.transform_with(observations.len(), |i| {
            let obs = &observations[i];
            Ok((&obs.predictors, obs.exposure))
        })
    }

    fn transform_with<'a, F>(&self, n: usize, mut row_at: F) -> Result<Design, AppError>
    where
        F: FnMut(usize) -> Result<(&'a RawRow, f64), AppError>,
    {
        let p = self.feature_names.len();
        let mut data = Vec::with_capacity(n * p);
        let mut offset = Vec::with_capacity(n);

        for i in 0..n {
            let (row, exposure) = row_at(i)?;
            if !(exposure.is_finite() && exposure > 0.0) {
                return Err(AppError::new(
                    ErrorKind::TransformError,
                    format!("row {i}: exposure must be positive and finite, got {exposure}"),
                ));
            }
            offset.push(exposure.min(MAX_EXPOSURE).ln());

            for name in &self.spec.numeric {
                let v = read_numeric(row, name, i)?;
                if !v.is_finite() {
                    return Err(AppError::new(
                        ErrorKind::TransformError,
                        format!("row {i}: non-finite value for '{name}'"),
                    ));
                }
                data.push(v);
            }
            for enc in &self.encoders {
                let value = read_text(row, enc.column(), i)?;
                enc.encode_into(value, &mut data)
                    .map_err(|e| AppError::new(e.kind(), format!("row {i}: {}", e.message())))?;
            }
        }

        Ok(Design {
            x: DMatrix::from_row_slice(n, p, &data),
            offset: DVector::from_vec(offset),
        })
    }
}

fn read_numeric(row: &RawRow, column: &str, idx: usize) -> Result<f64, AppError> {
    match row.get(column) {
        Some(FieldValue::Number(v)) => Ok(*v),
        Some(FieldValue::Text(s)) => Err(AppError::new(
            ErrorKind::SchemaMismatch,
            format!("row {idx}: column '{column}' must be numeric, got \"{s}\""),
        )),
        None => Err(missing(column, idx)),
    }
}

fn read_text<'a>(row: &'a RawRow, column: &str, idx: usize) -> Result<&'a str, AppError> {
    match row.get(column) {
        Some(FieldValue::Text(s)) => Ok(s),
        Some(FieldValue::Number(v)) => Err(AppError::new(
            ErrorKind::SchemaMismatch,
            format!("row {idx}: column '{column}' must be a string, got {v}"),
        )),
        None => Err(missing(column, idx)),
    }
}

fn missing(column: &str, idx: usize) -> AppError {
    AppError::new(
        ErrorKind::SchemaMismatch,
        format!("row {idx}: missing required column '{column}'"),
    )
}
