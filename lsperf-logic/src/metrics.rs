//! Metric Catalog
//!
//! The fixed set of numbers compared between two summaries. Each entry knows
//! how to read its value, how to judge a change, and how to print itself.

use crate::significance::{BaseRule, Modifier, SignificanceRule, ValueExtractor};
use lsperf_report::{Operation, PackageBenchmarkSummary, StatSummary};

/// How a metric value is printed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricFormat {
    /// Plain integer with thousands separators
    Count,
    /// Byte size, printed in KiB/MiB
    Bytes,
    /// Milliseconds with one decimal
    Milliseconds,
    /// Unitless ratio printed as a percentage
    Percentage,
}

impl MetricFormat {
    /// Render a value
    pub fn format(self, value: f64) -> String {
        match self {
            MetricFormat::Count => group_thousands(value.round() as i64),
            MetricFormat::Bytes => {
                let kib = value / 1024.0;
                if kib >= 1024.0 {
                    format!("{:.1} MiB", kib / 1024.0)
                } else {
                    format!("{:.1} KiB", kib)
                }
            }
            MetricFormat::Milliseconds => format!("{:.1} ms", value),
            MetricFormat::Percentage => format!("{:.1}%", value * 100.0),
        }
    }
}

fn group_thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if n < 0 {
        out.push('-');
    }
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Static descriptor of one compared number
#[derive(Debug)]
pub struct Metric {
    pub name: &'static str,
    pub value: ValueExtractor,
    pub significance: SignificanceRule,
    pub format: MetricFormat,
}

impl Metric {
    /// Read this metric from a summary
    pub fn value_of(&self, summary: &PackageBenchmarkSummary) -> Option<f64> {
        (self.value)(summary)
    }
}

fn identifier_count(s: &PackageBenchmarkSummary) -> Option<f64> {
    Some(s.run.identifier_count as f64)
}

fn type_count(s: &PackageBenchmarkSummary) -> Option<f64> {
    s.batch.as_ref().map(|b| b.type_count as f64)
}

fn memory_usage(s: &PackageBenchmarkSummary) -> Option<f64> {
    s.batch.as_ref().map(|b| b.memory_usage as f64)
}

fn assignability_cache(s: &PackageBenchmarkSummary) -> Option<f64> {
    s.batch.as_ref().map(|b| b.relation_cache_sizes.assignable as f64)
}

fn identity_cache(s: &PackageBenchmarkSummary) -> Option<f64> {
    s.batch.as_ref().map(|b| b.relation_cache_sizes.identity as f64)
}

fn subtype_cache(s: &PackageBenchmarkSummary) -> Option<f64> {
    s.batch.as_ref().map(|b| b.relation_cache_sizes.subtype as f64)
}

fn strict_subtype_cache(s: &PackageBenchmarkSummary) -> Option<f64> {
    s.batch.as_ref().map(|b| b.relation_cache_sizes.strict_subtype as f64)
}

fn stat(
    s: &PackageBenchmarkSummary,
    operation: Operation,
    field: fn(&StatSummary) -> f64,
) -> Option<f64> {
    s.operation(operation).map(field)
}

fn worst_mean_of(s: &PackageBenchmarkSummary, operation: Operation) -> Option<f64> {
    let summary = s.operation(operation)?;
    lsperf_stats::mean(summary.worst.durations(operation))
}

/// Batch-compile sizes scale with the amount of code under test
const BATCH_SIZE_MODIFIERS: &[Modifier] = &[
    Modifier::ProportionalTo {
        reference: identifier_count,
        reference_name: "identifier count",
    },
    Modifier::Floor { min: 1000.0 },
];

const LATENCY_FLOOR: &[Modifier] = &[Modifier::Floor { min: 5.0 }];
const WORST_LATENCY_FLOOR: &[Modifier] = &[Modifier::Floor { min: 20.0 }];

const BATCH_SIZE_RULE: SignificanceRule =
    SignificanceRule::with(BaseRule::OrderOfMagnitude, BATCH_SIZE_MODIFIERS);
const LATENCY_RULE: SignificanceRule = SignificanceRule::with(BaseRule::PercentDiff, LATENCY_FLOOR);
const WORST_LATENCY_RULE: SignificanceRule =
    SignificanceRule::with(BaseRule::PercentDiff, WORST_LATENCY_FLOOR);
const INFORMATIONAL: SignificanceRule = SignificanceRule::plain(BaseRule::Insignificant);

/// Every metric, in report order
pub static METRICS: &[Metric] = &[
    Metric {
        name: "Identifier count",
        value: identifier_count,
        significance: INFORMATIONAL,
        format: MetricFormat::Count,
    },
    Metric {
        name: "Type count",
        value: type_count,
        significance: BATCH_SIZE_RULE,
        format: MetricFormat::Count,
    },
    Metric {
        name: "Memory usage",
        value: memory_usage,
        significance: INFORMATIONAL,
        format: MetricFormat::Bytes,
    },
    Metric {
        name: "Assignability cache size",
        value: assignability_cache,
        significance: BATCH_SIZE_RULE,
        format: MetricFormat::Count,
    },
    Metric {
        name: "Identity cache size",
        value: identity_cache,
        significance: BATCH_SIZE_RULE,
        format: MetricFormat::Count,
    },
    Metric {
        name: "Subtype cache size",
        value: subtype_cache,
        significance: BATCH_SIZE_RULE,
        format: MetricFormat::Count,
    },
    Metric {
        name: "Strict subtype cache size",
        value: strict_subtype_cache,
        significance: BATCH_SIZE_RULE,
        format: MetricFormat::Count,
    },
    Metric {
        name: "Completions: mean",
        value: |s| stat(s, Operation::Completions, |x| x.mean),
        significance: LATENCY_RULE,
        format: MetricFormat::Milliseconds,
    },
    Metric {
        name: "Completions: median",
        value: |s| stat(s, Operation::Completions, |x| x.median),
        significance: LATENCY_RULE,
        format: MetricFormat::Milliseconds,
    },
    Metric {
        name: "Completions: worst mean",
        value: |s| worst_mean_of(s, Operation::Completions),
        significance: WORST_LATENCY_RULE,
        format: MetricFormat::Milliseconds,
    },
    Metric {
        name: "Completions: mean CV",
        value: |s| stat(s, Operation::Completions, |x| x.mean_coefficient_of_variation),
        significance: INFORMATIONAL,
        format: MetricFormat::Percentage,
    },
    Metric {
        name: "Completions: trials",
        value: |s| stat(s, Operation::Completions, |x| x.trials as f64),
        significance: INFORMATIONAL,
        format: MetricFormat::Count,
    },
    Metric {
        name: "Quick info: mean",
        value: |s| stat(s, Operation::QuickInfo, |x| x.mean),
        significance: LATENCY_RULE,
        format: MetricFormat::Milliseconds,
    },
    Metric {
        name: "Quick info: median",
        value: |s| stat(s, Operation::QuickInfo, |x| x.median),
        significance: LATENCY_RULE,
        format: MetricFormat::Milliseconds,
    },
    Metric {
        name: "Quick info: worst mean",
        value: |s| worst_mean_of(s, Operation::QuickInfo),
        significance: WORST_LATENCY_RULE,
        format: MetricFormat::Milliseconds,
    },
    Metric {
        name: "Quick info: mean CV",
        value: |s| stat(s, Operation::QuickInfo, |x| x.mean_coefficient_of_variation),
        significance: INFORMATIONAL,
        format: MetricFormat::Percentage,
    },
    Metric {
        name: "Quick info: trials",
        value: |s| stat(s, Operation::QuickInfo, |x| x.trials as f64),
        significance: INFORMATIONAL,
        format: MetricFormat::Count,
    },
];

/// Look a metric up by display name
pub fn metric(name: &str) -> Option<&'static Metric> {
    METRICS.iter().find(|m| m.name == name)
}
