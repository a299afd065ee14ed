//! Rare-level pooling and treatment (dummy) coding for one categorical column.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, ErrorKind};

/// Frozen encoding state for one categorical column.
///
/// `levels[0]` is the reference level and has no dummy column. When rare
/// levels were pooled at fit time, the pooled label is the last level and
/// also absorbs values never seen during fitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalEncoder {
    column: String,
    levels: Vec<String>,
    /// Training levels that were pooled into `other_label`.
    pooled: Vec<String>,
    other_label: Option<String>,
}

impl CategoricalEncoder {
    /// Learn levels from training values.
    pub fn fit(column: &str, values: &[&str], threshold: f64, other_label: &str) -> Self {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for v in values {
            *counts.entry(*v).or_default() += 1;
        }

        let n = values.len().max(1) as f64;
        let mut kept = Vec::new();
        let mut pooled = Vec::new();
        for (level, count) in counts {
            if (count as f64) / n < threshold {
                pooled.push(level.to_string());
            } else {
                kept.push(level.to_string());
            }
        }

        let other_label = if pooled.is_empty() {
            None
        } else {
            // A training level that happens to be spelled like the pooled
            // label merges into it.
            kept.retain(|l| l != other_label);
            kept.push(other_label.to_string());
            Some(other_label.to_string())
        };

        Self {
            column: column.to_string(),
            levels: kept,
            pooled,
            other_label,
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    pub fn pooled(&self) -> &[String] {
        &self.pooled
    }

    pub fn has_other(&self) -> bool {
        self.other_label.is_some()
    }

    /// Names of the dummy columns this encoder emits.
    pub fn dummy_names(&self) -> Vec<String> {
        self.levels
            .iter()
            .skip(1)
            .map(|l| format!("{}_{l}", self.column))
            .collect()
    }

    /// Resolve a raw value to its level index.
    pub fn level_index(&self, value: &str) -> Result<usize, AppError> {
        if let Some(idx) = self.levels.iter().position(|l| l == value) {
            return Ok(idx);
        }
        match &self.other_label {
            Some(other) => Ok(self.levels.iter().position(|l| l == other).unwrap_or(self.levels.len() - 1)),
            None => Err(AppError::new(
                ErrorKind::TransformError,
                format!("unseen level '{value}' in column '{}' and no pooled level", self.column),
            )),
        }
    }

    /// Append this column's dummy values for `value` to `out`.
    pub fn encode_into(&self, value: &str, out: &mut Vec<f64>) -> Result<(), AppError> {
        let idx = self.level_index(value)?;
        for j in 1..self.levels.len() {
            out.push(if j == idx { 1.0 } else { 0.0 });
        }
        Ok(())
    }
}
