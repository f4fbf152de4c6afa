//! Comparison
//!
//! Pairs two summaries metric by metric and hands the notification layer a
//! [`ComparisonOutcome`]. A prior document measured on an incompatible machine
//! is treated exactly like a missing one: the outcome is a single-run report.

use crate::change::{OverallChange, overall_change_for_single_comparison};
use crate::metrics::{METRICS, Metric};
use crate::significance::{Observation, Significance, SignificanceConfig, percent_diff};
use lsperf_report::{BenchmarkDocument, PackageBenchmarkSummary, SystemFingerprint};

/// One metric evaluated across a before/after pair
#[derive(Debug, Clone)]
pub struct ComparedMetric {
    pub metric: &'static Metric,
    pub before: Option<f64>,
    pub after: Option<f64>,
    pub percent_diff: Option<f64>,
    pub significance: Option<Significance>,
}

fn compare_metric(
    metric: &'static Metric,
    before: Option<&PackageBenchmarkSummary>,
    after: &PackageBenchmarkSummary,
    config: &SignificanceConfig,
) -> ComparedMetric {
    let before_value = before.and_then(|b| metric.value_of(b));
    let after_value = metric.value_of(after);
    let diff = before_value
        .zip(after_value)
        .and_then(|(b, a)| percent_diff(b, a));

    let significance = match (before, before_value, after_value, diff) {
        (Some(before), Some(before_value), Some(after_value), Some(percent_diff)) => {
            metric.significance.evaluate(
                &Observation {
                    percent_diff,
                    before_value,
                    after_value,
                    before,
                    after,
                },
                config,
            )
        }
        _ => None,
    };

    ComparedMetric {
        metric,
        before: before_value,
        after: after_value,
        percent_diff: diff,
        significance,
    }
}

/// Every catalog metric with a value on either side, in catalog order.
///
/// With no `before` this is the single-run table.
pub fn compare_all(
    before: Option<&PackageBenchmarkSummary>,
    after: &PackageBenchmarkSummary,
    config: &SignificanceConfig,
) -> Vec<ComparedMetric> {
    METRICS
        .iter()
        .map(|metric| compare_metric(metric, before, after, config))
        .filter(|m| m.before.is_some() || m.after.is_some())
        .collect()
}

/// Metrics whose change is defined and significant
pub fn interesting_metrics(
    before: &PackageBenchmarkSummary,
    after: &PackageBenchmarkSummary,
    config: &SignificanceConfig,
) -> Vec<ComparedMetric> {
    compare_all(Some(before), after, config)
        .into_iter()
        .filter(|m| m.percent_diff.is_some() && m.significance.is_some())
        .collect()
}

/// What the notification layer receives
#[derive(Debug, Clone)]
pub struct ComparisonOutcome {
    /// `None` when there was no usable baseline
    pub change: Option<OverallChange>,
    /// Full table, significant or not
    pub metrics: Vec<ComparedMetric>,
    pub before: Option<BenchmarkDocument>,
    pub after: BenchmarkDocument,
}

impl ComparisonOutcome {
    /// Only the significant rows
    pub fn interesting(&self) -> impl Iterator<Item = &ComparedMetric> {
        self.metrics.iter().filter(|m| m.significance.is_some())
    }
}

/// Compare a fresh document against the stored baseline.
///
/// `system` is the fingerprint of the machine that produced `after`; a
/// baseline taken elsewhere is dropped with a warning.
pub fn compare_documents(
    before: Option<BenchmarkDocument>,
    after: BenchmarkDocument,
    system: &SystemFingerprint,
    config: &SignificanceConfig,
) -> ComparisonOutcome {
    let before = before.filter(|doc| {
        let compatible = doc.meta.system.is_compatible_with(system);
        if !compatible {
            tracing::warn!(
                baseline = %doc.key(),
                baseline_cpu = %doc.meta.system.cpu,
                current_cpu = %system.cpu,
                "baseline measured on an incompatible machine, reporting single run"
            );
        }
        compatible
    });

    let metrics = compare_all(before.as_ref().map(|d| &d.summary), &after.summary, config);
    let change = before
        .as_ref()
        .map(|_| overall_change_for_single_comparison(&metrics));

    ComparisonOutcome {
        change,
        metrics,
        before,
        after,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsperf_report::{BatchMetrics, PositionBenchmark, RunInfo, StatSummary};

    fn fingerprint(cpu: &str) -> SystemFingerprint {
        SystemFingerprint {
            os: "linux".to_string(),
            os_version: "6.1".to_string(),
            arch: "x86_64".to_string(),
            cpu: cpu.to_string(),
            cpu_cores: 4,
            memory_gb: 16.0,
        }
    }

    fn stat(mean: f64) -> StatSummary {
        let mut worst = PositionBenchmark::new("a.test.ts", 1, "x", 1, 2);
        worst.completions_durations = vec![mean];
        worst.quick_info_durations = vec![mean];
        StatSummary {
            mean,
            median: mean,
            standard_deviation: 0.0,
            mean_coefficient_of_variation: 0.0,
            trials: 5,
            worst,
        }
    }

    fn summary(toolchain: &str, type_count: u64, completions_mean: f64) -> PackageBenchmarkSummary {
        PackageBenchmarkSummary {
            run: RunInfo {
                package_name: "react".to_string(),
                package_version: "18.2".to_string(),
                toolchain_version: toolchain.to_string(),
                source_version: None,
                requested_iterations: 5,
                identifier_count: 200,
                benchmark_duration_ms: 5000.0,
                language_service_crashed: false,
                timed_out: false,
            },
            batch: Some(BatchMetrics {
                type_count,
                memory_usage: 1 << 30,
                ..BatchMetrics::default()
            }),
            completions: Some(stat(completions_mean)),
            quick_info: Some(stat(10.0)),
        }
    }

    #[test]
    fn test_unchanged_is_not_interesting() {
        let config = SignificanceConfig::default();
        let s = summary("5.4", 50_000, 40.0);
        assert!(interesting_metrics(&s, &s, &config).is_empty());
    }

    #[test]
    fn test_latency_regression_is_interesting() {
        let config = SignificanceConfig::default();
        let before = summary("5.3", 50_000, 40.0);
        let after = summary("5.4", 50_000, 100.0);
        let interesting = interesting_metrics(&before, &after, &config);
        let names: Vec<&str> = interesting.iter().map(|m| m.metric.name).collect();
        assert!(names.contains(&"Completions: mean"));
        assert!(names.contains(&"Completions: median"));
        assert!(
            interesting
                .iter()
                .all(|m| m.significance == Some(Significance::Alert))
        );
    }

    #[test]
    fn test_type_count_explosion() {
        let config = SignificanceConfig::default();
        let before = summary("5.3", 10_000, 40.0);
        let after = summary("5.4", 120_000, 40.0);
        let interesting = interesting_metrics(&before, &after, &config);
        assert_eq!(interesting.len(), 1);
        assert_eq!(interesting[0].metric.name, "Type count");
        assert_eq!(interesting[0].significance, Some(Significance::Alert));
    }

    #[test]
    fn test_zero_baseline_has_no_diff() {
        let config = SignificanceConfig::default();
        let before = summary("5.3", 0, 40.0);
        let after = summary("5.4", 10_000, 40.0);
        let all = compare_all(Some(&before), &after, &config);
        let types = all.iter().find(|m| m.metric.name == "Type count").unwrap();
        assert_eq!(types.percent_diff, None);
        assert_eq!(types.significance, None);
        assert!(interesting_metrics(&before, &after, &config).is_empty());
    }

    #[test]
    fn test_missing_batch_metrics_are_never_judged() {
        let config = SignificanceConfig::default();
        let before = summary("5.3", 50_000, 40.0);
        let mut after = summary("5.4", 50_000, 40.0);
        after.batch = None;

        let all = compare_all(Some(&before), &after, &config);
        let types = all.iter().find(|m| m.metric.name == "Type count").unwrap();
        assert_eq!(types.before, Some(50_000.0));
        assert_eq!(types.after, None);
        assert_eq!(types.significance, None);
        assert!(interesting_metrics(&before, &after, &config).is_empty());
    }

    #[test]
    fn test_single_run_without_baseline() {
        let config = SignificanceConfig::default();
        let after = BenchmarkDocument::new(summary("5.4", 1, 1.0), fingerprint("EPYC"));
        let outcome = compare_documents(None, after, &fingerprint("EPYC"), &config);
        assert_eq!(outcome.change, None);
        assert!(outcome.before.is_none());
        assert!(!outcome.metrics.is_empty());
        assert!(outcome.metrics.iter().all(|m| m.percent_diff.is_none()));
    }

    #[test]
    fn test_incompatible_baseline_is_dropped() {
        let config = SignificanceConfig::default();
        let before = BenchmarkDocument::new(summary("5.3", 10, 1.0), fingerprint("Xeon"));
        let after = BenchmarkDocument::new(summary("5.4", 10, 100.0), fingerprint("EPYC"));
        let outcome = compare_documents(Some(before), after, &fingerprint("EPYC"), &config);
        assert_eq!(outcome.change, None);
        assert!(outcome.before.is_none());
    }

    #[test]
    fn test_compatible_baseline_yields_verdict() {
        let config = SignificanceConfig::default();
        let before = BenchmarkDocument::new(summary("5.3", 50_000, 40.0), fingerprint("EPYC"));
        let after = BenchmarkDocument::new(summary("5.4", 50_000, 10.0), fingerprint("EPYC"));
        let outcome = compare_documents(Some(before), after, &fingerprint("EPYC"), &config);
        assert_eq!(outcome.change, Some(OverallChange::BETTER));
        assert!(outcome.interesting().count() >= 2);
    }
}
