//! Benchmark Data Structures
//!
//! Raw per-package records produced by a run, and the summaries derived from
//! them. Summaries are what gets persisted and compared.

use lsperf_ipc::{BatchCompileResult, SingleMeasurement};
use serde::{Deserialize, Serialize};

/// Every trial for one sampled position, keyed by `(file, offset)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionBenchmark {
    pub file: String,
    pub offset: u32,
    pub identifier_text: String,
    pub line: u32,
    pub column: u32,
    pub completions_durations: Vec<f64>,
    pub quick_info_durations: Vec<f64>,
}

impl PositionBenchmark {
    /// Empty accumulator for a position about to be scheduled
    pub fn new(
        file: impl Into<String>,
        offset: u32,
        identifier_text: impl Into<String>,
        line: u32,
        column: u32,
    ) -> Self {
        Self {
            file: file.into(),
            offset,
            identifier_text: identifier_text.into(),
            line,
            column,
            completions_durations: Vec::new(),
            quick_info_durations: Vec::new(),
        }
    }

    /// Routing key
    pub fn key(&self) -> (&str, u32) {
        (&self.file, self.offset)
    }

    /// Append one trial
    pub fn record(&mut self, measurement: &SingleMeasurement) {
        self.completions_durations
            .push(measurement.completions_duration_ms);
        self.quick_info_durations
            .push(measurement.quick_info_duration_ms);
    }

    /// Number of recorded trials
    pub fn trial_count(&self) -> usize {
        self.completions_durations.len()
    }

    /// True when no trial ever landed (crashed before the first sample)
    pub fn is_empty(&self) -> bool {
        self.completions_durations.is_empty() && self.quick_info_durations.is_empty()
    }

    /// Duration list for one operation
    pub fn durations(&self, operation: Operation) -> &[f64] {
        match operation {
            Operation::Completions => &self.completions_durations,
            Operation::QuickInfo => &self.quick_info_durations,
        }
    }
}

/// A position-scoped service operation whose latency is tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Completions,
    QuickInfo,
}

impl Operation {
    /// Both tracked operations, in report order
    pub const ALL: [Operation; 2] = [Operation::Completions, Operation::QuickInfo];

    /// Display name
    pub fn name(self) -> &'static str {
        match self {
            Operation::Completions => "completions",
            Operation::QuickInfo => "quick info",
        }
    }
}

/// Internal relation-cache sizes after a batch compile
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationCacheSizes {
    pub assignable: u64,
    pub identity: u64,
    pub subtype: u64,
    pub strict_subtype: u64,
}

/// Batch-compile metrics, measured in a one-shot process
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchMetrics {
    pub type_count: u64,
    /// Heap bytes in use after the compile
    pub memory_usage: u64,
    pub relation_cache_sizes: RelationCacheSizes,
}

impl From<&BatchCompileResult> for BatchMetrics {
    fn from(result: &BatchCompileResult) -> Self {
        let caches = &result.relation_cache_sizes;
        Self {
            type_count: result.type_count,
            memory_usage: result.memory_usage,
            relation_cache_sizes: RelationCacheSizes {
                assignable: caches.assignable,
                identity: caches.identity,
                subtype: caches.subtype,
                strict_subtype: caches.strict_subtype,
            },
        }
    }
}

/// Identity and run flags shared by the raw record and its summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub package_name: String,
    pub package_version: String,
    pub toolchain_version: String,
    /// Revision of the package sources, when the resolver knows it
    pub source_version: Option<String>,
    pub requested_iterations: usize,
    /// Identifiers available for sampling before the cap applied
    pub identifier_count: usize,
    pub benchmark_duration_ms: f64,
    pub language_service_crashed: bool,
    pub timed_out: bool,
}

/// Raw result of benchmarking one package under one toolchain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageBenchmark {
    pub run: RunInfo,
    /// Absent when the batch-compile worker crashed or timed out
    #[serde(default)]
    pub batch: Option<BatchMetrics>,
    /// Non-empty positions only
    pub positions: Vec<PositionBenchmark>,
}

/// Cross-position statistics for one operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatSummary {
    /// Mean of per-position means (ms)
    pub mean: f64,
    /// Median of per-position means (ms)
    pub median: f64,
    /// Standard deviation of per-position means (ms)
    pub standard_deviation: f64,
    /// Mean of per-position coefficients of variation
    pub mean_coefficient_of_variation: f64,
    /// Positions that contributed
    pub trials: usize,
    /// Position with the highest mean, raw durations included
    pub worst: PositionBenchmark,
}

/// Per-package summary, the unit that is persisted and compared
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageBenchmarkSummary {
    pub run: RunInfo,
    #[serde(default)]
    pub batch: Option<BatchMetrics>,
    pub completions: Option<StatSummary>,
    pub quick_info: Option<StatSummary>,
}

impl PackageBenchmarkSummary {
    /// Summary for one operation, if any position contributed
    pub fn operation(&self, operation: Operation) -> Option<&StatSummary> {
        match operation {
            Operation::Completions => self.completions.as_ref(),
            Operation::QuickInfo => self.quick_info.as_ref(),
        }
    }
}
