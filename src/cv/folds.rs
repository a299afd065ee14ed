//! Seeded k-fold partitioning.

use rand::prelude::*;
use rand::rngs::StdRng;

use crate::error::{AppError, ErrorKind};

/// One analysis/assessment split. Both index lists are ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub index: usize,
    pub analysis: Vec<usize>,
    pub assessment: Vec<usize>,
}

/// Partition `0..n` into `k` folds after a seeded shuffle.
///
/// Assessment sets are disjoint, differ in size by at most one and together
/// cover every index exactly once. Each fold's analysis set is the
/// complement of its assessment set.
pub fn make_folds(n: usize, k: usize, seed: u64) -> Result<Vec<Fold>, AppError> {
    if k < 2 {
        return Err(AppError::new(ErrorKind::InvalidInput, format!("k must be at least 2 (got {k}).")));
    }
    if k > n {
        return Err(AppError::new(
            ErrorKind::InvalidInput,
            format!("k={k} exceeds the number of observations ({n})."),
        ));
    }

    let mut order: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);

    // fold_of[i] = fold that assesses observation i
    let mut fold_of = vec![0usize; n];
    let base = n / k;
    let extra = n % k;
    let mut start = 0;
    for fold in 0..k {
        let size = base + usize::from(fold < extra);
        for &i in &order[start..start + size] {
            fold_of[i] = fold;
        }
        start += size;
    }

    let folds = (0..k)
        .map(|fold| {
            let (assessment, analysis): (Vec<usize>, Vec<usize>) = (0..n).partition(|&i| fold_of[i] == fold);
            Fold {
                index: fold,
                analysis,
                assessment,
            }
        })
        .collect();
    Ok(folds)
}
