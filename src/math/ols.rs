//! Weighted least squares solvers.
//!
//! Each IRLS step of the GLM fitter solves a weighted least squares problem:
//!
//! ```text
//! minimize Σ w_i (z_i - x_i^T β)^2
//! ```
//!
//! Implementation choices:
//! - The design can be large (hundreds of thousands of rows) but narrow (a few
//!   dozen columns), so we accumulate the `p × p` normal equations in one pass
//!   and solve them with a Cholesky factorization.
//! - If the Gram matrix is not positive definite (collinear dummies, empty
//!   levels in a fold) we fall back to an SVD solve of the small system.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Solve weighted least squares via the normal equations `XᵀWX β = XᵀWz`.
///
/// `x` is `n × p`, `w` and `z` have length `n`. Weights must be non-negative.
pub fn solve_weighted_normal_equations(
    x: &DMatrix<f64>,
    w: &DVector<f64>,
    z: &DVector<f64>,
) -> Option<DVector<f64>> {
    let p = x.ncols();
    let mut gram = DMatrix::<f64>::zeros(p, p);
    let mut rhs = DVector::<f64>::zeros(p);

    for i in 0..x.nrows() {
        let wi = w[i];
        if wi == 0.0 {
            continue;
        }
        let row = x.row(i);
        for a in 0..p {
            let xa = row[a] * wi;
            if xa == 0.0 {
                continue;
            }
            rhs[a] += xa * z[i];
            for b in a..p {
                gram[(a, b)] += xa * row[b];
            }
        }
    }
    for a in 0..p {
        for b in 0..a {
            gram[(a, b)] = gram[(b, a)];
        }
    }

    if let Some(chol) = gram.clone().cholesky() {
        let beta = chol.solve(&rhs);
        if beta.iter().all(|v| v.is_finite()) {
            return Some(beta);
        }
    }

    solve_least_squares(&gram, &rhs)
}
