//! Poisson deviance.
//!
//! Unit deviance for an observed count `y` and predicted mean `μ`:
//!
//! ```text
//! d(y, μ) = 2 [ y ln(y / μ) - (y - μ) ]      (y > 0)
//! d(0, μ) = 2 μ
//! ```
//!
//! No dispersion parameter is estimated.

use crate::error::{AppError, ErrorKind};

/// Unit Poisson deviance.
pub fn unit_poisson_deviance(y: f64, mu: f64) -> f64 {
    if y > 0.0 {
        2.0 * (y * (y / mu).ln() - (y - mu))
    } else {
        2.0 * mu
    }
}

/// Sum of unit deviances. Callers ensure equal lengths.
pub fn total_poisson_deviance(actual: &[f64], predicted: &[f64]) -> f64 {
    actual
        .iter()
        .zip(predicted)
        .map(|(&y, &mu)| unit_poisson_deviance(y, mu))
        .sum()
}

/// Mean Poisson deviance between observed counts and predicted means.
pub fn mean_poisson_deviance(actual: &[f64], predicted: &[f64]) -> Result<f64, AppError> {
    if actual.len() != predicted.len() {
        return Err(AppError::new(
            ErrorKind::InvalidInput,
            format!("{} actuals vs {} predictions", actual.len(), predicted.len()),
        ));
    }
    if actual.is_empty() {
        return Err(AppError::new(ErrorKind::InvalidInput, "Cannot score an empty assessment set."));
    }
    if predicted.iter().any(|m| !(m.is_finite() && *m > 0.0)) {
        return Err(AppError::new(ErrorKind::InvalidInput, "Predictions must be finite and positive."));
    }
    Ok(total_poisson_deviance(actual, predicted) / actual.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_prediction_has_zero_deviance() {
        let y = [1.0, 2.0, 3.0];
        assert!(mean_poisson_deviance(&y, &y).unwrap().abs() < 1e-12);
    }

    #[test]
    fn zero_counts_contribute_twice_the_mean() {
        assert!((unit_poisson_deviance(0.0, 0.3) - 0.6).abs() < 1e-12);
        let d = mean_poisson_deviance(&[0.0, 0.0], &[0.1, 0.3]).unwrap();
        assert!((d - 0.4).abs() < 1e-12);
    }

    #[test]
    fn deviance_is_non_negative() {
        for &y in &[0.0, 1.0, 4.0] {
            for &mu in &[0.01, 0.5, 1.0, 3.0] {
                assert!(unit_poisson_deviance(y, mu) >= -1e-12);
            }
        }
    }

    #[test]
    fn rejects_mismatched_or_empty_inputs() {
        assert!(mean_poisson_deviance(&[1.0], &[1.0, 2.0]).is_err());
        assert!(mean_poisson_deviance(&[], &[]).is_err());
        assert!(mean_poisson_deviance(&[1.0], &[0.0]).is_err());
    }
}
