//! JSON Output

use crate::document::BenchmarkDocument;
use serde::{Deserialize, Serialize};

/// Schema identifier written into every run report
pub const RUN_REPORT_SCHEMA: &str = "lsperf-run-report";

/// Machine-readable report for one `lsperf run`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Schema identifier
    pub schema: String,
    /// One document per benchmarked package/toolchain pair
    pub documents: Vec<BenchmarkDocument>,
}

impl RunReport {
    /// Report over the documents produced by a run
    pub fn new(documents: Vec<BenchmarkDocument>) -> Self {
        Self {
            schema: RUN_REPORT_SCHEMA.to_string(),
            documents,
        }
    }
}

/// Generate a prettified JSON report.
pub fn generate_json_report(report: &RunReport) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(report)
}
