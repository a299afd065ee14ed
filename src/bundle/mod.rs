//! The bundle: a fitted pipeline and model travelling as one immutable value.
//!
//! A `Bundle` is the unit of storage and serving. Its two halves are never
//! stored or served separately, so the transformation applied at serving
//! time is always the one the model was trained against.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{Observation, RawRow};
use crate::error::{AppError, ErrorKind};
use crate::glm::{GlmOptions, PoissonGlm};
use crate::preprocess::{Pipeline, PipelineSpec};

pub mod format;

pub use format::{BUNDLE_FORMAT, BUNDLE_FORMAT_VERSION};

/// Fitted preprocessing + fitted model.
#[derive(Debug, Clone, PartialEq)]
pub struct Bundle {
    pipeline: Pipeline,
    model: PoissonGlm,
    trained_at: DateTime<Utc>,
}

/// Human-facing description of a bundle's input and output schema.
#[derive(Debug, Clone, Serialize)]
pub struct BundleInfo {
    pub numeric: Vec<String>,
    pub categorical: BTreeMap<String, Vec<String>>,
    pub features: Vec<String>,
    pub trained_at: DateTime<Utc>,
    pub training_rows: usize,
}

impl Bundle {
    /// Pair a fitted pipeline with a fitted model.
    ///
    /// Fails with `SchemaMismatch` unless the pipeline's output features are
    /// exactly the model's input features, in the same order.
    pub fn new(pipeline: Pipeline, model: PoissonGlm) -> Result<Self, AppError> {
        Self::with_timestamp(pipeline, model, Utc::now())
    }

    pub(crate) fn with_timestamp(
        pipeline: Pipeline,
        model: PoissonGlm,
        trained_at: DateTime<Utc>,
    ) -> Result<Self, AppError> {
        if pipeline.feature_names() != model.feature_names() {
            return Err(AppError::new(
                ErrorKind::SchemaMismatch,
                format!(
                    "Pipeline produces [{}] but the model expects [{}].",
                    pipeline.feature_names().join(", "),
                    model.feature_names().join(", ")
                ),
            ));
        }
        Ok(Self {
            pipeline,
            model,
            trained_at,
        })
    }

    /// Fit a pipeline and a model on the same observations and bundle them.
    pub fn fit(spec: &PipelineSpec, observations: &[Observation], opts: &GlmOptions) -> Result<Self, AppError> {
        let pipeline = Pipeline::fit(spec, observations)?;
        let design = pipeline.transform_observations(observations)?;
        let counts: Vec<f64> = observations.iter().map(|o| o.claim_count).collect();
        let model = PoissonGlm::fit(&design, &counts, pipeline.feature_names(), opts)?;
        Self::new(pipeline, model)
    }

    /// Expected claim counts for raw rows, one per row, in input order.
    pub fn predict(&self, rows: &[RawRow]) -> Result<Vec<f64>, AppError> {
        let design = self.pipeline.transform(rows)?;
        self.model.predict(&design)
    }

    /// Same as `predict` for observations already held in memory.
    pub fn predict_observations(&self, observations: &[Observation]) -> Result<Vec<f64>, AppError> {
        let design = self.pipeline.transform_observations(observations)?;
        self.model.predict(&design)
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn model(&self) -> &PoissonGlm {
        &self.model
    }

    pub fn trained_at(&self) -> DateTime<Utc> {
        self.trained_at
    }

    pub fn describe(&self) -> BundleInfo {
        BundleInfo {
            numeric: self.pipeline.spec().numeric.clone(),
            categorical: self
                .pipeline
                .encoders()
                .iter()
                .map(|e| (e.column().to_string(), e.levels().to_vec()))
                .collect(),
            features: self.pipeline.feature_names().to_vec(),
            trained_at: self.trained_at,
            training_rows: self.model.n_obs(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::FieldValue;

    /// Small two-column training set: area (with a pooled level) and vehicle power.
    pub(crate) fn training_rows() -> Vec<Observation> {
        let mut rows = Vec::new();
        for i in 0..400usize {
            let area = match i % 50 {
                0 => "F",
                1..=20 => "A",
                21..=35 => "B",
                _ => "C",
            };
            let power = 4.0 + (i % 7) as f64;
            let exposure = 0.2 + (i % 5) as f64 * 0.2;
            let claim_count = match (area, i % 9) {
                ("C", 0) | ("C", 4) => 1.0,
                ("B", 3) => 1.0,
                (_, 7) => 2.0,
                _ => 0.0,
            };
            rows.push(Observation {
                id: i.to_string(),
                predictors: RawRow::from([
                    ("area".to_string(), FieldValue::from(area)),
                    ("vehicle_power".to_string(), FieldValue::Number(power)),
                ]),
                exposure,
                claim_count,
            });
        }
        rows
    }

    pub(crate) fn small_spec() -> PipelineSpec {
        PipelineSpec::with_columns(&["area"], &["vehicle_power"])
    }

    pub(crate) fn fitted_bundle() -> Bundle {
        Bundle::fit(&small_spec(), &training_rows(), &GlmOptions::default()).unwrap()
    }

    fn row(area: &str, power: f64, exposure: f64) -> RawRow {
        RawRow::from([
            ("area".to_string(), FieldValue::from(area)),
            ("vehicle_power".to_string(), FieldValue::Number(power)),
            ("exposure".to_string(), FieldValue::Number(exposure)),
        ])
    }

    #[test]
    fn seen_category_yields_one_finite_non_negative_prediction() {
        let bundle = fitted_bundle();
        let preds = bundle.predict(&[row("A", 5.0, 0.5)]).unwrap();
        assert_eq!(preds.len(), 1);
        assert!(preds[0].is_finite() && preds[0] >= 0.0);
    }

    #[test]
    fn predictions_keep_input_order_and_are_repeatable() {
        let bundle = fitted_bundle();
        let rows = vec![row("C", 9.0, 1.0), row("A", 4.0, 0.1), row("B", 6.0, 0.7)];
        let first = bundle.predict(&rows).unwrap();
        let again = bundle.predict(&rows).unwrap();
        assert_eq!(first, again);

        let single: Vec<f64> = rows
            .iter()
            .map(|r| bundle.predict(std::slice::from_ref(r)).unwrap()[0])
            .collect();
        assert_eq!(first, single);
    }

    #[test]
    fn unseen_category_uses_pooled_level() {
        // "F" is 2% of training rows, so area has a pooled level.
        let bundle = fitted_bundle();
        let unseen = bundle.predict(&[row("Q", 5.0, 1.0)]).unwrap();
        let pooled = bundle.predict(&[row("F", 5.0, 1.0)]).unwrap();
        assert_eq!(unseen, pooled);
    }

    #[test]
    fn unseen_category_without_pooled_level_is_a_transform_error() {
        let mut spec = small_spec();
        spec.other_threshold = 0.0;
        let bundle = Bundle::fit(&spec, &training_rows(), &GlmOptions::default()).unwrap();
        assert!(!bundle.pipeline().encoders()[0].has_other());

        let err = bundle.predict(&[row("Q", 5.0, 1.0)]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransformError);
        assert!(bundle.predict(&[row("F", 5.0, 1.0)]).is_ok());
    }

    #[test]
    fn overflowing_numeric_input_is_a_transform_error() {
        let bundle = fitted_bundle();
        let err = bundle.predict(&[row("A", 1e308, 1.0)]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransformError);
        let err = bundle.predict(&[row("A", -1e308, 1.0)]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransformError);
    }

    #[test]
    fn failed_predict_leaves_bundle_usable() {
        let bundle = fitted_bundle();
        let before = bundle.clone();
        let mut bad = row("A", 5.0, 1.0);
        bad.remove("vehicle_power");
        let err = bundle.predict(&[row("A", 5.0, 1.0), bad]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
        assert!(err.message().starts_with("row 1:"));
        assert_eq!(bundle, before);
        assert!(bundle.predict(&[row("A", 5.0, 1.0)]).is_ok());
    }

    #[test]
    fn mismatched_pipeline_and_model_fail_construction() {
        let rows = training_rows();
        let wide = Pipeline::fit(&small_spec(), &rows).unwrap();
        let narrow_spec = PipelineSpec::with_columns(&[], &["vehicle_power"]);
        let narrow = Pipeline::fit(&narrow_spec, &rows).unwrap();
        let design = narrow.transform_observations(&rows).unwrap();
        let counts: Vec<f64> = rows.iter().map(|o| o.claim_count).collect();
        let model = PoissonGlm::fit(&design, &counts, narrow.feature_names(), &GlmOptions::default()).unwrap();

        let err = Bundle::new(wide, model).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
    }

    #[test]
    fn describe_lists_levels_and_features() {
        let info = fitted_bundle().describe();
        assert_eq!(info.categorical["area"], vec!["A", "B", "C", "other"]);
        assert_eq!(info.features[0], "vehicle_power");
        assert_eq!(info.training_rows, 400);
    }
}
