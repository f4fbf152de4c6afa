#![warn(missing_docs)]
//! lsperf Statistics
//!
//! Descriptive statistics over per-position latency samples:
//! - mean and median (linear-interpolated percentile)
//! - population standard deviation
//! - coefficient of variation, the run-quality signal reported per package

mod percentiles;
mod summary;

pub use percentiles::compute_percentile;
pub use summary::{
    SummaryStatistics, coefficient_of_variation, compute_summary, mean, median, std_dev,
};

/// Coefficient of variation above which a run is considered noisy
pub const NOISY_CV_THRESHOLD: f64 = 0.25;
