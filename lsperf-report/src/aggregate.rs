//! Statistic Aggregation
//!
//! Reduces raw per-position duration lists into per-package summaries.
//!
//! Each position is first reduced to its own mean and coefficient of variation
//! (in parallel with Rayon). The package-level numbers are then statistics over
//! those per-position means:
//! - `mean`, `median`, `standard_deviation` of the per-position means
//! - `mean_coefficient_of_variation`, the stability signal
//! - `worst`, the slowest position kept whole for drill-down

use crate::benchmark::{
    Operation, PackageBenchmark, PackageBenchmarkSummary, PositionBenchmark, StatSummary,
};
use lsperf_stats::{coefficient_of_variation, compute_summary, mean};
use rayon::prelude::*;

struct PositionReduction<'a> {
    position: &'a PositionBenchmark,
    mean: f64,
    coefficient_of_variation: f64,
}

/// Summarize one operation across positions.
///
/// Positions with no samples for the operation do not contribute; when none
/// contribute the result is `None`.
pub fn summarize_operation(
    positions: &[PositionBenchmark],
    operation: Operation,
) -> Option<StatSummary> {
    let reductions: Vec<PositionReduction<'_>> = positions
        .par_iter()
        .filter_map(|position| {
            let durations = position.durations(operation);
            Some(PositionReduction {
                position,
                mean: mean(durations)?,
                coefficient_of_variation: coefficient_of_variation(durations)?,
            })
        })
        .collect();

    let means: Vec<f64> = reductions.iter().map(|r| r.mean).collect();
    let cvs: Vec<f64> = reductions
        .iter()
        .map(|r| r.coefficient_of_variation)
        .collect();

    let across = compute_summary(&means)?;
    // First position wins ties so the choice is stable across runs
    let worst = reductions
        .iter()
        .reduce(|worst, r| if r.mean > worst.mean { r } else { worst })?;

    Some(StatSummary {
        mean: across.mean,
        median: across.median,
        standard_deviation: across.std_dev,
        mean_coefficient_of_variation: mean(&cvs)?,
        trials: reductions.len(),
        worst: worst.position.clone(),
    })
}

/// Summarize a raw package record
pub fn summarize(benchmark: &PackageBenchmark) -> PackageBenchmarkSummary {
    let summary = PackageBenchmarkSummary {
        run: benchmark.run.clone(),
        batch: benchmark.batch,
        completions: summarize_operation(&benchmark.positions, Operation::Completions),
        quick_info: summarize_operation(&benchmark.positions, Operation::QuickInfo),
    };

    for operation in Operation::ALL {
        if summary.operation(operation).is_none() {
            tracing::warn!(
                package = %benchmark.run.package_name,
                operation = operation.name(),
                "no position produced a sample"
            );
        }
    }

    summary
}
