//! Cross-validation harness.
//!
//! Given observations, a fold count and a fitting function, fit one model per
//! fold on the analysis rows and score mean Poisson deviance on the
//! assessment rows. Folds are independent and run on the rayon pool.
//!
//! A fold that fails is recorded and left out of the aggregates; the run only
//! fails when every fold does. Fit failures are reported as `FoldFitError`,
//! scoring failures (e.g. a held-out level the fold's pipeline cannot
//! encode) keep their own kind.
//! There is no model selection here: the caller reads the summary and
//! decides what to fit on the full data.

use std::collections::BTreeMap;

use rayon::prelude::*;

use crate::bundle::Bundle;
use crate::domain::Observation;
use crate::error::{AppError, ErrorKind};
use crate::glm::mean_poisson_deviance;

pub mod folds;

pub use folds::{Fold, make_folds};

pub const DEFAULT_FOLDS: usize = 10;
pub const DEFAULT_SEED: u64 = 42;

/// What the harness needs from a fitted candidate.
pub trait FoldModel {
    /// Named coefficient estimates, intercept included.
    fn coefficients(&self) -> Vec<(String, f64)>;

    /// Expected claim counts for `observations`, in order.
    fn predict_counts(&self, observations: &[Observation]) -> Result<Vec<f64>, AppError>;
}

impl FoldModel for Bundle {
    fn coefficients(&self) -> Vec<(String, f64)> {
        self.model().coefficients()
    }

    fn predict_counts(&self, observations: &[Observation]) -> Result<Vec<f64>, AppError> {
        self.predict_observations(observations)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CvConfig {
    pub k: usize,
    pub seed: u64,
}

impl Default for CvConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_FOLDS,
            seed: DEFAULT_SEED,
        }
    }
}

/// Outcome of one successful fold.
#[derive(Debug, Clone, PartialEq)]
pub struct FitResult {
    pub fold: usize,
    pub analysis_size: usize,
    pub assessment_size: usize,
    pub coefficients: Vec<(String, f64)>,
    /// Mean unit Poisson deviance on the assessment rows.
    pub deviance: f64,
}

#[derive(Debug, Clone)]
pub struct FoldFailure {
    pub fold: usize,
    pub error: AppError,
}

/// Everything a cross-validation run produced.
#[derive(Debug, Clone)]
pub struct CvReport {
    pub k: usize,
    pub seed: u64,
    pub n_obs: usize,
    /// Successful folds, ascending by fold index.
    pub results: Vec<FitResult>,
    pub failures: Vec<FoldFailure>,
}

/// Mean and spread of one coefficient across the successful folds.
#[derive(Debug, Clone, PartialEq)]
pub struct CoefficientSummary {
    pub name: String,
    pub mean: f64,
    /// Sample standard deviation; 0 when the coefficient appears in one fold.
    pub std: f64,
    pub folds: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CvSummary {
    pub coefficients: Vec<CoefficientSummary>,
    pub mean_deviance: f64,
    pub folds_ok: usize,
    pub folds_failed: usize,
}

impl CvReport {
    /// Coefficient estimates keyed by name, then by fold index.
    ///
    /// A name missing from some folds (e.g. a dummy for a level that was
    /// pooled in that fold) simply has fewer entries.
    pub fn coefficient_table(&self) -> BTreeMap<String, BTreeMap<usize, f64>> {
        let mut table: BTreeMap<String, BTreeMap<usize, f64>> = BTreeMap::new();
        for r in &self.results {
            for (name, value) in &r.coefficients {
                table.entry(name.clone()).or_default().insert(r.fold, *value);
            }
        }
        table
    }

    pub fn summary(&self) -> CvSummary {
        let coefficients = self
            .coefficient_table()
            .into_iter()
            .map(|(name, by_fold)| {
                let values: Vec<f64> = by_fold.into_values().collect();
                let (mean, std) = mean_and_std(&values);
                CoefficientSummary {
                    name,
                    mean,
                    std,
                    folds: values.len(),
                }
            })
            .collect();
        let deviances: Vec<f64> = self.results.iter().map(|r| r.deviance).collect();
        CvSummary {
            coefficients,
            mean_deviance: mean_and_std(&deviances).0,
            folds_ok: self.results.len(),
            folds_failed: self.failures.len(),
        }
    }
}

/// Run k-fold cross-validation with `fit` as the candidate.
pub fn cross_validate<M, F>(data: &[Observation], config: &CvConfig, fit: F) -> Result<CvReport, AppError>
where
    M: FoldModel,
    F: Fn(&[Observation]) -> Result<M, AppError> + Sync,
{
    let folds = make_folds(data.len(), config.k, config.seed)?;
    log::info!("cross-validating {} observations over {} folds (seed {})", data.len(), config.k, config.seed);

    let outcomes: Vec<Result<FitResult, FoldFailure>> = folds
        .par_iter()
        .map(|fold| {
            run_fold(data, fold, &fit).map_err(|error| {
                log::warn!("fold {} failed ({}): {}", fold.index, error.kind().code(), error.message());
                FoldFailure {
                    fold: fold.index,
                    error,
                }
            })
        })
        .collect();

    let mut results = Vec::with_capacity(config.k);
    let mut failures = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(r) => results.push(r),
            Err(f) => failures.push(f),
        }
    }

    if results.is_empty() {
        let (kind, first) = failures
            .first()
            .map(|f| (f.error.kind(), f.error.message().to_string()))
            .unwrap_or((ErrorKind::FoldFitError, String::new()));
        return Err(AppError::new(
            kind,
            format!("All {} folds failed; first failure: {first}", config.k),
        ));
    }

    Ok(CvReport {
        k: config.k,
        seed: config.seed,
        n_obs: data.len(),
        results,
        failures,
    })
}

fn run_fold<M, F>(data: &[Observation], fold: &Fold, fit: &F) -> Result<FitResult, AppError>
where
    M: FoldModel,
    F: Fn(&[Observation]) -> Result<M, AppError>,
{
    let analysis: Vec<Observation> = fold.analysis.iter().map(|&i| data[i].clone()).collect();
    let assessment: Vec<Observation> = fold.assessment.iter().map(|&i| data[i].clone()).collect();

    let in_fold = |e: AppError, kind: ErrorKind| AppError::new(kind, format!("fold {}: {}", fold.index, e.message()));

    // Anything raised while fitting is a fit failure; scoring errors keep their kind.
    let model = fit(&analysis).map_err(|e| in_fold(e, ErrorKind::FoldFitError))?;
    let predicted = model
        .predict_counts(&assessment)
        .map_err(|e| {
            let kind = e.kind();
            in_fold(e, kind)
        })?;
    let actual: Vec<f64> = assessment.iter().map(|o| o.claim_count).collect();
    let deviance = mean_poisson_deviance(&actual, &predicted).map_err(|e| {
        let kind = e.kind();
        in_fold(e, kind)
    })?;
    log::debug!("fold {}: mean deviance {deviance:.5}", fold.index);

    Ok(FitResult {
        fold: fold.index,
        analysis_size: analysis.len(),
        assessment_size: assessment.len(),
        coefficients: model.coefficients(),
        deviance,
    })
}

fn mean_and_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var.sqrt())
}
