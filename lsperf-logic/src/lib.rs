#![warn(missing_docs)]
//! lsperf Logic - Regression Analysis
//!
//! Turns two package summaries into a verdict:
//! - a fixed catalog of metrics, each with a composable significance rule
//! - per-metric comparison with explicit handling of missing baselines
//! - change aggregation into an `OverallChange` bitset
//! - a Markdown table for whatever posts the result

mod change;
mod compare;
mod markdown;
mod metrics;
mod significance;

pub use change::{
    OverallChange, overall_change_for_comparisons, overall_change_for_single_comparison,
};
pub use compare::{
    ComparedMetric, ComparisonOutcome, compare_all, compare_documents, interesting_metrics,
};
pub use markdown::render_markdown;
pub use metrics::{METRICS, Metric, MetricFormat, metric};
pub use significance::{
    BaseRule, MissingReferencePolicy, Modifier, Observation, Significance, SignificanceConfig,
    SignificanceRule, ValueExtractor, percent_diff,
};
