//! Summary Statistics
//!
//! Descriptive statistics over a list of durations. An empty list has no
//! summary at all (`None`), so callers never see a mean of zero trials.

use crate::percentiles::compute_percentile;

/// Descriptive statistics for a non-empty sample list
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SummaryStatistics {
    pub mean: f64,
    pub median: f64,
    /// Population standard deviation
    pub std_dev: f64,
    /// `std_dev / mean`, or 0 when the mean is 0
    pub coefficient_of_variation: f64,
    pub sample_count: usize,
}

/// Arithmetic mean, `None` for an empty slice.
pub fn mean(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        None
    } else {
        Some(samples.iter().sum::<f64>() / samples.len() as f64)
    }
}

/// Median; even-length slices average the two middle values.
pub fn median(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        None
    } else {
        Some(compute_percentile(samples, 50.0))
    }
}

/// Population standard deviation, `None` for an empty slice.
pub fn std_dev(samples: &[f64]) -> Option<f64> {
    let m = mean(samples)?;
    let variance = samples.iter().map(|x| (x - m).powi(2)).sum::<f64>() / samples.len() as f64;
    Some(variance.sqrt())
}

/// Coefficient of variation (`std_dev / mean`).
///
/// A zero mean yields 0 rather than NaN: every sample was zero.
pub fn coefficient_of_variation(samples: &[f64]) -> Option<f64> {
    let m = mean(samples)?;
    let s = std_dev(samples)?;
    Some(if m == 0.0 { 0.0 } else { s / m })
}

/// Compute summary statistics, or `None` when there are no samples.
pub fn compute_summary(samples: &[f64]) -> Option<SummaryStatistics> {
    let mean = mean(samples)?;
    let std_dev = std_dev(samples)?;
    Some(SummaryStatistics {
        mean,
        median: median(samples)?,
        std_dev,
        coefficient_of_variation: if mean == 0.0 { 0.0 } else { std_dev / mean },
        sample_count: samples.len(),
    })
}
