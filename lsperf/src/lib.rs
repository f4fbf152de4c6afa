#![warn(missing_docs)]
//! # lsperf
//!
//! Performance regression checks for a language service, one package at a time.
//!
//! lsperf measures how long completions and quick-info take at sampled source
//! positions, then decides whether a change is worth flagging:
//! - **Sampling**: a deterministic, capped sample of identifier positions from a package's test files
//! - **Process Isolation**: measurements run in supervised worker processes; a crash costs one trial, not the run
//! - **Zero-Copy IPC**: supervisor-worker communication using rkyv serialization
//! - **Aggregation**: per-position means and coefficients of variation, folded into package statistics
//! - **Significance Rules**: composable rules with floors and proportional normalization
//! - **Verdicts**: per-comparison and per-run `OverallChange` bitsets, plus a Markdown table
//!
//! ## Quick Start
//!
//! ```ignore
//! use lsperf::prelude::*;
//!
//! struct MyToolchain;
//!
//! impl Toolchain for MyToolchain {
//!     // project_files, open_session, batch_compile ...
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     let registry = ToolchainRegistry::new().register(MyToolchain);
//!     lsperf::run(&registry)
//! }
//! ```
//!
//! The binary then doubles as its own worker:
//!
//! ```text
//! my-bench run jobs.toml --jobs 4 --format markdown
//! ```

// Re-export core types
pub use lsperf_core::{
    Identifier, LanguageSession, SamplePosition, ServiceError, SourceFile, Toolchain,
    ToolchainRegistry, WorkerMain, sample_identifiers, sample_package_positions,
};

// Re-export IPC types
pub use lsperf_ipc::{
    BatchCompileResult, PositionMeasurement, RelationCacheSizes, SingleMeasurement,
    WorkerMessage, WorkerRequest,
};

// Re-export report types
pub use lsperf_report::{
    BenchmarkDocument, DocumentKey, DocumentStore, JsonFileStore, PackageBenchmark,
    PackageBenchmarkSummary, PositionBenchmark, StatSummary, SystemFingerprint, summarize,
};

// Re-export logic types
pub use lsperf_logic::{
    ComparedMetric, ComparisonOutcome, MissingReferencePolicy, OverallChange, Significance,
    SignificanceConfig, compare_all, compare_documents, interesting_metrics,
    overall_change_for_comparisons, overall_change_for_single_comparison, render_markdown,
};

// Re-export stats
pub use lsperf_stats::{SummaryStatistics, compute_summary};

// Re-export the runner
pub use lsperf_cli::{
    BenchmarkRequest, Orchestrator, OrchestratorError, PackageResolver, PoolConfig,
    PositionArena, ResolvedPackage, SupervisorError, WorkerPool, WorkerSpawner,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        LanguageSession, PackageResolver, ResolvedPackage, ServiceError, SourceFile, Toolchain,
        ToolchainRegistry,
    };
}

/// Run the lsperf CLI.
///
/// Call this from your binary's `main()`:
/// ```ignore
/// fn main() {
///     lsperf::run(&registry).unwrap();
/// }
/// ```
pub use lsperf_cli::run;
