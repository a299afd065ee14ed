//! Poisson GLM with log link and a log-exposure offset.
//!
//! The model is
//!
//! ```text
//! E[claims_i] = exposure_i * exp(β0 + x_iᵀ β)
//! ```
//!
//! fitted by iteratively reweighted least squares (IRLS):
//!
//! - working response `z = η - offset + (y - μ) / μ`
//! - working weights  `w = μ`
//! - solve the weighted least squares problem for β, update `η`, repeat
//!
//! Convergence uses the relative change in deviance, the same rule as the
//! usual statistical packages: `|D - D_old| / (|D| + 0.1) < tolerance`.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, ErrorKind};
use crate::glm::deviance::total_poisson_deviance;
use crate::math::solve_weighted_normal_equations;
use crate::preprocess::Design;

/// Name reported for the intercept coefficient.
pub const INTERCEPT: &str = "(Intercept)";

/// Linear predictors are clamped here while fitting; at predict time a
/// larger magnitude is rejected.
const MAX_ETA: f64 = 700.0;

/// IRLS controls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlmOptions {
    pub max_iter: usize,
    pub tolerance: f64,
}

impl Default for GlmOptions {
    fn default() -> Self {
        Self {
            max_iter: 25,
            tolerance: 1e-8,
        }
    }
}

/// A fitted Poisson regression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoissonGlm {
    feature_names: Vec<String>,
    intercept: f64,
    coefficients: Vec<f64>,
    /// Residual deviance on the training rows.
    deviance: f64,
    iterations: usize,
    n_obs: usize,
}

impl PoissonGlm {
    /// Fit the model on a design and the matching observed counts.
    pub fn fit(
        design: &Design,
        counts: &[f64],
        feature_names: &[String],
        opts: &GlmOptions,
    ) -> Result<Self, AppError> {
        let n = design.n_rows();
        let p = design.x.ncols();
        if n == 0 {
            return Err(AppError::new(ErrorKind::InvalidInput, "Cannot fit a GLM on zero rows."));
        }
        if counts.len() != n {
            return Err(AppError::new(
                ErrorKind::InvalidInput,
                format!("Got {} counts for {n} design rows.", counts.len()),
            ));
        }
        if feature_names.len() != p {
            return Err(AppError::new(
                ErrorKind::SchemaMismatch,
                format!("Got {} feature names for {p} design columns.", feature_names.len()),
            ));
        }
        if counts.iter().any(|y| !(y.is_finite() && *y >= 0.0)) {
            return Err(AppError::new(ErrorKind::InvalidInput, "Claim counts must be finite and >= 0."));
        }
        if opts.max_iter == 0 || !(opts.tolerance.is_finite() && opts.tolerance > 0.0) {
            return Err(AppError::new(ErrorKind::InvalidInput, "Invalid IRLS options."));
        }

        let x = design.x.clone().insert_column(0, 1.0);
        let y = DVector::from_column_slice(counts);

        // Start from μ = y + 0.1 so log(μ) is finite for zero counts.
        let mut mu: DVector<f64> = y.map(|v| v + 0.1);
        let mut eta: DVector<f64> = mu.map(f64::ln);
        let mut dev_old = f64::INFINITY;

        for iter in 1..=opts.max_iter {
            let z = DVector::from_fn(n, |i, _| eta[i] - design.offset[i] + (y[i] - mu[i]) / mu[i]);
            let beta = solve_weighted_normal_equations(&x, &mu, &z).ok_or_else(|| {
                AppError::new(ErrorKind::FoldFitError, format!("IRLS step {iter}: singular weighted system"))
            })?;

            eta = &x * &beta + &design.offset;
            mu = eta.map(|e| e.min(MAX_ETA).exp());

            let dev = total_poisson_deviance(y.as_slice(), mu.as_slice());
            if !dev.is_finite() {
                return Err(AppError::new(
                    ErrorKind::FoldFitError,
                    format!("IRLS step {iter}: deviance diverged"),
                ));
            }

            if (dev - dev_old).abs() / (dev.abs() + 0.1) < opts.tolerance {
                log::debug!("IRLS converged after {iter} iterations (deviance {dev:.4})");
                return Ok(Self {
                    feature_names: feature_names.to_vec(),
                    intercept: beta[0],
                    coefficients: beta.iter().skip(1).copied().collect(),
                    deviance: dev,
                    iterations: iter,
                    n_obs: n,
                });
            }
            dev_old = dev;
        }

        Err(AppError::new(
            ErrorKind::FoldFitError,
            format!("IRLS did not converge in {} iterations", opts.max_iter),
        ))
    }

    /// Check internal consistency after deserialization.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.coefficients.len() != self.feature_names.len() {
            return Err(AppError::new(
                ErrorKind::CorruptArtifact,
                "Model coefficient count does not match its feature names.",
            ));
        }
        if !self.intercept.is_finite() || self.coefficients.iter().any(|c| !c.is_finite()) {
            return Err(AppError::new(ErrorKind::CorruptArtifact, "Model has non-finite coefficients."));
        }
        Ok(())
    }

    /// Expected claim counts `exposure * exp(β0 + xᵀβ)` for each design row.
    pub fn predict(&self, design: &Design) -> Result<Vec<f64>, AppError> {
        if design.x.ncols() != self.coefficients.len() {
            return Err(AppError::new(
                ErrorKind::SchemaMismatch,
                format!(
                    "Design has {} columns but the model expects {}.",
                    design.x.ncols(),
                    self.coefficients.len()
                ),
            ));
        }
        let beta = DVector::from_column_slice(&self.coefficients);
        let eta = &design.x * beta + &design.offset;
        eta.iter()
            .enumerate()
            .map(|(i, e)| {
                let eta = e + self.intercept;
                // exp() under- or overflows past this range.
                if !(eta.is_finite() && eta.abs() <= MAX_ETA) {
                    return Err(AppError::new(
                        ErrorKind::TransformError,
                        format!("row {i}: linear predictor {eta} is out of range"),
                    ));
                }
                Ok(eta.exp())
            })
            .collect()
    }

    /// Input schema of the model.
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Named coefficients, intercept first.
    pub fn coefficients(&self) -> Vec<(String, f64)> {
        std::iter::once((INTERCEPT.to_string(), self.intercept))
            .chain(self.feature_names.iter().cloned().zip(self.coefficients.iter().copied()))
            .collect()
    }

    pub fn deviance(&self) -> f64 {
        self.deviance
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn n_obs(&self) -> usize {
        self.n_obs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;

    fn design(x: &[f64], p: usize, exposure: &[f64]) -> Design {
        let n = exposure.len();
        Design {
            x: DMatrix::from_row_slice(n, p, x),
            offset: DVector::from_iterator(n, exposure.iter().map(|e| e.ln())),
        }
    }

    #[test]
    fn intercept_only_fit_recovers_rate() {
        // Total claims / total exposure = 6 / 4 = 1.5.
        let d = design(&[], 0, &[1.0, 1.0, 1.0, 1.0]);
        let fit = PoissonGlm::fit(&d, &[1.0, 2.0, 0.0, 3.0], &[], &GlmOptions::default()).unwrap();
        assert!((fit.coefficients()[0].1 - 1.5_f64.ln()).abs() < 1e-8);
        let pred = fit.predict(&d).unwrap();
        assert!(pred.iter().all(|m| (m - 1.5).abs() < 1e-8));
    }

    #[test]
    fn dummy_fit_matches_group_rates() {
        // Group 0: 2 claims over 2.0 exposure, group 1: 3 claims over 1.0 exposure.
        let x = [0.0, 0.0, 1.0, 1.0];
        let d = design(&x, 1, &[1.0, 1.0, 0.5, 0.5]);
        let names = vec!["group_1".to_string()];
        let fit = PoissonGlm::fit(&d, &[1.0, 1.0, 2.0, 1.0], &names, &GlmOptions::default()).unwrap();
        let coefs = fit.coefficients();
        assert_eq!(coefs[0].0, INTERCEPT);
        assert!((coefs[0].1 - 1.0_f64.ln()).abs() < 1e-7);
        assert!((coefs[1].1 - 3.0_f64.ln()).abs() < 1e-7);
        let pred = fit.predict(&d).unwrap();
        assert!((pred[2] - 1.5).abs() < 1e-7);
    }

    #[test]
    fn predict_rejects_wrong_width() {
        let d = design(&[], 0, &[1.0, 1.0]);
        let fit = PoissonGlm::fit(&d, &[1.0, 0.0], &[], &GlmOptions::default()).unwrap();
        let wide = design(&[1.0, 2.0], 1, &[1.0, 1.0]);
        assert_eq!(fit.predict(&wide).unwrap_err().kind(), ErrorKind::SchemaMismatch);
    }

    #[test]
    fn out_of_range_linear_predictor_is_a_transform_error() {
        let x = [0.0, 0.0, 1.0, 1.0];
        let d = design(&x, 1, &[1.0, 1.0, 0.5, 0.5]);
        let names = vec!["group_1".to_string()];
        let fit = PoissonGlm::fit(&d, &[1.0, 1.0, 2.0, 1.0], &names, &GlmOptions::default()).unwrap();

        for extreme in [1e308, 1_000.0, -1_000.0] {
            let err = fit.predict(&design(&[1.0, extreme], 1, &[1.0, 1.0])).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::TransformError);
            assert!(err.message().starts_with("row 1:"));
        }
    }

    #[test]
    fn iteration_budget_exhaustion_is_a_fit_error() {
        let x = [0.0, 1.0, 2.0, 3.0];
        let d = design(&x, 1, &[1.0; 4]);
        let opts = GlmOptions {
            max_iter: 1,
            tolerance: 1e-12,
        };
        let err = PoissonGlm::fit(&d, &[0.0, 1.0, 3.0, 7.0], &["x".to_string()], &opts).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FoldFitError);
    }

    #[test]
    fn negative_counts_are_rejected() {
        let d = design(&[], 0, &[1.0]);
        assert!(PoissonGlm::fit(&d, &[-1.0], &[], &GlmOptions::default()).is_err());
    }
}
