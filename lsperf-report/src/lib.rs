#![warn(missing_docs)]
//! lsperf Report - Benchmark Records
//!
//! Data model and everything downstream of a raw run that is not a verdict:
//! - raw and summarized package benchmarks
//! - the statistic aggregator
//! - the document store with machine fingerprints
//! - JSON output

mod aggregate;
mod benchmark;
mod document;
mod json;

pub use aggregate::{summarize, summarize_operation};
pub use benchmark::{
    BatchMetrics, Operation, PackageBenchmark, PackageBenchmarkSummary, PositionBenchmark,
    RelationCacheSizes, RunInfo, StatSummary,
};
pub use document::{
    BenchmarkDocument, DOCUMENT_SCHEMA_VERSION, DocumentKey, DocumentMeta, DocumentStore,
    JsonFileStore, StoreError, SystemFingerprint,
};
pub use json::{RUN_REPORT_SCHEMA, RunReport, generate_json_report};

/// Output format selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON run report
    Json,
    /// Markdown comparison table
    Markdown,
    /// Human-readable terminal output
    Human,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            "human" | "text" => Ok(OutputFormat::Human),
            other => Err(format!("Unknown output format: {}", other)),
        }
    }
}
