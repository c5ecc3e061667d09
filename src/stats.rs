//! Quartile statistics and IQR thresholds for a single numeric column.

use crate::error::{AnomalyError, Result};
use crate::table::{ColumnKind, DatasetView, Schema};
use serde::Serialize;

/// Standard box-plot multiplier.
pub const DEFAULT_IQR_MULTIPLIER: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ColumnStats {
    pub q1: f64,
    pub q3: f64,
    pub iqr: f64,
}

impl ColumnStats {
    pub fn new(q1: f64, q3: f64) -> Self {
        Self { q1, q3, iqr: q3 - q1 }
    }

    /// `(q1 - k*iqr, q3 + k*iqr)`
    pub fn thresholds(&self, multiplier: f64) -> ThresholdPair {
        ThresholdPair::new(self.q1 - multiplier * self.iqr, self.q3 + multiplier * self.iqr)
    }
}

/// Outlier bounds. Values strictly below `lower` or strictly above `upper` are anomalous.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThresholdPair {
    pub lower: f64,
    pub upper: f64,
}

impl ThresholdPair {
    pub fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    pub fn is_outside(&self, x: f64) -> bool {
        x < self.lower || x > self.upper
    }

    /// Replaces either bound with a caller-supplied value.
    pub fn with_overrides(self, lower: Option<f64>, upper: Option<f64>) -> Self {
        Self { lower: lower.unwrap_or(self.lower), upper: upper.unwrap_or(self.upper) }
    }
}

/// Computes Q1, Q3 and IQR of `column` over the rows of `view`.
///
/// Missing cells (including NaN) are ignored; infinities take part like any
/// other number. Quantiles use linear interpolation between closest ranks.
///
/// ```
/// use iqrscope::stats::calculate_stats;
/// use iqrscope::table::{Dataset, Value};
///
/// let values = [10.0, 12.0, 11.0, 100.0, 9.0].map(Value::from).to_vec();
/// let ds = Dataset::from_columns(vec![("value", values)]).unwrap();
/// let stats = calculate_stats(&ds.view(), "value").unwrap();
/// assert_eq!((stats.q1, stats.q3, stats.iqr), (10.0, 12.0, 2.0));
/// ```
pub fn calculate_stats(view: &DatasetView<'_>, column: &str) -> Result<ColumnStats> {
    let idx = numeric_column_index(view.schema(), column)?;
    let mut xs: Vec<f64> = view.numbers(idx).collect();
    if xs.is_empty() {
        return Err(AnomalyError::InsufficientData(column.to_string()));
    }
    xs.sort_by(f64::total_cmp);
    let q1 = quantile_sorted(&xs, 0.25).ok_or_else(|| AnomalyError::InsufficientData(column.to_string()))?;
    let q3 = quantile_sorted(&xs, 0.75).ok_or_else(|| AnomalyError::InsufficientData(column.to_string()))?;
    Ok(ColumnStats::new(q1, q3))
}

/// Linear-interpolation quantile of ascending `sorted` values, `p` in `[0, 1]`.
pub fn quantile_sorted(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() || !(0.0..=1.0).contains(&p) {
        return None;
    }
    let h = (sorted.len() - 1) as f64 * p;
    let lo = h.floor() as usize;
    let frac = h - h.floor();
    let base = sorted[lo];
    match sorted.get(lo + 1) {
        // equal neighbours (including two infinities) need no interpolation
        Some(&next) if frac > 0.0 && next != base => Some(base + frac * (next - base)),
        _ => Some(base),
    }
}

pub(crate) fn numeric_column_index(schema: &Schema, column: &str) -> Result<usize> {
    let idx = schema.index_of(column).ok_or_else(|| AnomalyError::ColumnNotFound(column.to_string()))?;
    if schema.columns()[idx].kind != ColumnKind::Numeric {
        return Err(AnomalyError::NotNumeric(column.to_string()));
    }
    Ok(idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantile_interpolates_between_ranks() {
        let xs = [18.0, 19.0, 20.0, 20.0, 21.0, 21.0, 22.0, 22.0, 50.0, 100.0];
        assert_eq!(quantile_sorted(&xs, 0.25), Some(20.0));
        assert_eq!(quantile_sorted(&xs, 0.75), Some(22.0));
        let ys = [58.0, 59.0, 59.0, 60.0, 60.0, 61.0, 61.0, 62.0, 62.0, 200.0];
        assert_eq!(quantile_sorted(&ys, 0.25), Some(59.25));
        assert_eq!(quantile_sorted(&ys, 0.75), Some(61.75));
    }

    #[test]
    fn quantile_edges() {
        assert_eq!(quantile_sorted(&[], 0.5), None);
        assert_eq!(quantile_sorted(&[42.0], 0.25), Some(42.0));
        assert_eq!(quantile_sorted(&[10.0, 20.0], 0.25), Some(12.5));
        assert_eq!(quantile_sorted(&[1.0, 2.0, 3.0], 1.0), Some(3.0));
        assert_eq!(quantile_sorted(&[1.0], 1.5), None);
        let inf = f64::INFINITY;
        assert_eq!(quantile_sorted(&[1.0, 2.0, 3.0, 4.0, inf], 0.75), Some(4.0));
        assert_eq!(quantile_sorted(&[1.0, inf], 0.5), Some(inf));
        assert_eq!(quantile_sorted(&[inf, inf, inf], 0.25), Some(inf));
    }

    #[test]
    fn overrides_replace_single_bound() {
        let t = ColumnStats::new(10.0, 12.0).thresholds(DEFAULT_IQR_MULTIPLIER);
        assert_eq!(t, ThresholdPair::new(7.0, 15.0));
        assert_eq!(t.with_overrides(None, Some(20.0)), ThresholdPair::new(7.0, 20.0));
        assert!(!t.is_outside(7.0));
        assert!(!t.is_outside(15.0));
        assert!(t.is_outside(15.5));
    }
}
