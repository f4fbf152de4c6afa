//! Job Manifest
//!
//! A TOML file listing the packages to benchmark and the toolchains to run
//! them under, so a batch of work can be split across machines.
//!
//! ```toml
//! toolchains = ["5.3", "5.4"]
//! baseline_toolchain = "5.3"
//!
//! [runner]
//! iterations = 3
//!
//! [[package]]
//! name = "react"
//! version = "18.2"
//! ```

use crate::config::RunnerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One package version to benchmark
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSpec {
    pub name: String,
    pub version: String,
}

/// Parsed manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobManifest {
    /// Toolchain versions; every package runs under each
    pub toolchains: Vec<String>,
    /// Toolchain whose results serve as "before" in comparisons
    #[serde(default)]
    pub baseline_toolchain: Option<String>,
    /// Shared runner options, overriding lsperf.toml
    #[serde(default)]
    pub runner: Option<RunnerConfig>,
    #[serde(default, rename = "package")]
    pub packages: Vec<PackageSpec>,
}

impl JobManifest {
    /// Load and validate a manifest file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let manifest: Self = toml::from_str(&content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Check the manifest describes runnable work
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.toolchains.is_empty() {
            anyhow::bail!("manifest lists no toolchains");
        }
        if self.packages.is_empty() {
            anyhow::bail!("manifest lists no packages");
        }
        if let Some(baseline) = &self.baseline_toolchain {
            if !self.toolchains.contains(baseline) {
                anyhow::bail!("baseline toolchain {baseline} is not in the toolchain list");
            }
        }
        if let Some(pkg) = self
            .packages
            .iter()
            .find(|p| p.name.trim().is_empty() || p.version.trim().is_empty())
        {
            anyhow::bail!("package entry with empty name or version: {pkg:?}");
        }
        if let Some(runner) = &self.runner {
            runner.validate()?;
        }
        Ok(())
    }
}
