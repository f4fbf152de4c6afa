//! Run Planner
//!
//! Expands a manifest into individual benchmark jobs.
//!
//! - Regex filtering on package name
//! - Packages sorted by name, then version, for deterministic execution
//! - Each package runs under every toolchain, baseline first

use crate::manifest::{JobManifest, PackageSpec};

/// One package under one toolchain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchmarkJob {
    pub package: PackageSpec,
    pub toolchain_version: String,
}

/// Ordered jobs for a run
#[derive(Debug, Clone, Default)]
pub struct RunPlan {
    pub jobs: Vec<BenchmarkJob>,
    /// Toolchain used as "before" when comparing
    pub baseline_toolchain: Option<String>,
}

/// Build the run plan from a manifest
pub fn build_plan(manifest: &JobManifest, filter: Option<&regex::Regex>) -> RunPlan {
    let mut packages: Vec<&PackageSpec> = manifest
        .packages
        .iter()
        .filter(|p| filter.is_none_or(|re| re.is_match(&p.name)))
        .collect();
    packages.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.version.cmp(&b.version)));
    packages.dedup();

    let mut toolchains: Vec<&String> = manifest.toolchains.iter().collect();
    if let Some(baseline) = &manifest.baseline_toolchain {
        toolchains.sort_by_key(|t| *t != baseline);
    }

    let jobs = packages
        .into_iter()
        .flat_map(|package| {
            toolchains.iter().map(move |toolchain| BenchmarkJob {
                package: package.clone(),
                toolchain_version: (*toolchain).clone(),
            })
        })
        .collect();

    RunPlan {
        jobs,
        baseline_toolchain: manifest.baseline_toolchain.clone(),
    }
}
