//! Configuration loading from lsperf.toml
//!
//! lsperf configuration can be specified in an `lsperf.toml` file in the
//! project root. The configuration is automatically discovered by walking up
//! from the current directory. Command-line flags override file values.

use crate::supervisor::PoolConfig;
use lsperf_logic::SignificanceConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Name of the discovered configuration file
pub const CONFIG_FILE_NAME: &str = "lsperf.toml";

/// lsperf configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LsperfConfig {
    /// Runner configuration
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Significance thresholds
    #[serde(default)]
    pub comparison: SignificanceConfig,
    /// Output configuration
    #[serde(default)]
    pub output: OutputConfig,
}

/// Runner configuration for measurement runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Trials per sampled position
    #[serde(default = "default_iterations")]
    pub iterations: usize,
    /// Package-wide cap on sampled positions
    #[serde(default)]
    pub max_positions: Option<usize>,
    /// Number of parallel workers (defaults to available parallelism)
    #[serde(default)]
    pub jobs: Option<usize>,
    /// Budget for a single worker request (e.g., "60s")
    #[serde(default = "default_call_timeout")]
    pub call_timeout: String,
    /// Soft deadline for one package (e.g., "10m")
    #[serde(default)]
    pub max_run_time: Option<String>,
    /// Replace crashed workers and keep going
    #[serde(default = "default_crash_recovery")]
    pub crash_recovery: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
            max_positions: None,
            jobs: None,
            call_timeout: default_call_timeout(),
            max_run_time: None,
            crash_recovery: default_crash_recovery(),
        }
    }
}

fn default_iterations() -> usize {
    5
}
fn default_call_timeout() -> String {
    "60s".to_string()
}
fn default_crash_recovery() -> bool {
    true
}

impl RunnerConfig {
    /// Reject settings that cannot produce a run
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.iterations == 0 {
            anyhow::bail!("runner.iterations must be at least 1");
        }
        if self.max_positions == Some(0) {
            anyhow::bail!("runner.max_positions must be at least 1 when set");
        }
        if self.jobs == Some(0) {
            anyhow::bail!("runner.jobs must be at least 1 when set");
        }
        if parse_duration(&self.call_timeout)?.is_zero() {
            anyhow::bail!("runner.call_timeout must be positive");
        }
        if let Some(limit) = &self.max_run_time {
            parse_duration(limit)?;
        }
        Ok(())
    }

    /// Pool limits derived from this configuration
    pub fn pool_config(&self) -> anyhow::Result<PoolConfig> {
        let defaults = PoolConfig::default();
        Ok(PoolConfig {
            jobs: self.jobs.unwrap_or(defaults.jobs),
            call_timeout: parse_duration(&self.call_timeout)?,
            max_run_time: self
                .max_run_time
                .as_deref()
                .map(parse_duration)
                .transpose()?,
            crash_recovery: self.crash_recovery,
        })
    }
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Default output format: "human", "json", "markdown"
    #[serde(default = "default_format")]
    pub format: String,
    /// Directory of the JSON document store
    #[serde(default = "default_store_dir")]
    pub store_directory: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
            store_directory: default_store_dir(),
        }
    }
}

fn default_format() -> String {
    "human".to_string()
}
fn default_store_dir() -> String {
    "target/lsperf/store".to_string()
}

impl LsperfConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Try to discover and load configuration by walking up from current directory
    pub fn discover() -> Option<Self> {
        let mut dir = std::env::current_dir().ok()?;
        loop {
            let config_path = dir.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                return match Self::load(&config_path) {
                    Ok(config) => Some(config),
                    Err(e) => {
                        tracing::warn!(path = %config_path.display(), error = %e, "ignoring unreadable config");
                        None
                    }
                };
            }
            if !dir.pop() {
                break;
            }
        }
        None
    }

    /// Validate every section
    pub fn validate(&self) -> anyhow::Result<()> {
        self.runner.validate()?;
        self.comparison
            .validate()
            .map_err(|e| anyhow::anyhow!("comparison: {e}"))?;
        self.output
            .format
            .parse::<lsperf_report::OutputFormat>()
            .map_err(|e| anyhow::anyhow!("output.format: {e}"))?;
        Ok(())
    }

    /// Generate a default configuration as TOML string
    pub fn default_toml() -> String {
        r#"# lsperf Configuration

[runner]
# Trials per sampled position
iterations = 5
# Package-wide cap on sampled positions (uncomment to enable)
# max_positions = 250
# Number of parallel workers (uncomment to enable)
# jobs = 4
# Budget for a single completions/quick-info request
call_timeout = "60s"
# Soft deadline per package; remaining trials are skipped (uncomment to enable)
# max_run_time = "10m"
# Replace crashed workers and keep going
crash_recovery = true

[comparison]
# Percent-diff thresholds, as fractions
warning_threshold = 0.2
alert_threshold = 1.0
awesome_threshold = -0.2
# Order-of-magnitude thresholds, as after/before ratios
warning_multiple = 5.0
alert_multiple = 10.0
awesome_multiple = 0.5
# When a proportional reference metric is missing: "use-unnormalized" or "suppress"
missing_reference = "use-unnormalized"

[output]
# Default output format: human, json, markdown
format = "human"
# JSON document store
store_directory = "target/lsperf/store"
"#
        .to_string()
    }
}

/// Parse duration string (e.g., "90s", "500ms", "10m")
pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(anyhow::anyhow!("Empty duration string"));
    }

    let (num_part, unit_part) = s
        .char_indices()
        .find(|(_, c)| c.is_alphabetic())
        .map(|(i, _)| s.split_at(i))
        .unwrap_or((s, "s"));

    let value: f64 = num_part
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid duration number: {}", num_part))?;
    if !value.is_finite() || value < 0.0 {
        return Err(anyhow::anyhow!("Duration must be non-negative: {}", s));
    }

    let seconds_per_unit = match unit_part.to_lowercase().as_str() {
        "ms" => 0.001,
        "s" | "" => 1.0,
        "m" | "min" => 60.0,
        "h" => 3600.0,
        _ => return Err(anyhow::anyhow!("Unknown duration unit: {}", unit_part)),
    };

    Ok(Duration::from_secs_f64(value * seconds_per_unit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsperf_logic::MissingReferencePolicy;

    #[test]
    fn test_default_config() {
        let config = LsperfConfig::default();
        assert_eq!(config.runner.iterations, 5);
        assert_eq!(config.runner.call_timeout, "60s");
        assert!(config.runner.crash_recovery);
        assert_eq!(config.comparison.warning_threshold, 0.2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("90").unwrap(), Duration::from_secs(90));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("3 fortnights").is_err());
        assert!(parse_duration("-1s").is_err());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
            [runner]
            iterations = 3
            max_positions = 40
            max_run_time = "5m"

            [comparison]
            alert_threshold = 0.5
            missing_reference = "suppress"
        "#;

        let config: LsperfConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.runner.iterations, 3);
        assert_eq!(config.runner.max_positions, Some(40));
        assert_eq!(config.comparison.alert_threshold, 0.5);
        assert_eq!(
            config.comparison.missing_reference,
            MissingReferencePolicy::Suppress
        );
        // Defaults should still apply
        assert_eq!(config.comparison.warning_threshold, 0.2);
        assert_eq!(config.output.format, "human");

        let pool = config.runner.pool_config().unwrap();
        assert_eq!(pool.max_run_time, Some(Duration::from_secs(300)));
        assert_eq!(pool.call_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_default_toml_parses() {
        let config: LsperfConfig = toml::from_str(&LsperfConfig::default_toml()).unwrap();
        assert_eq!(config.runner.iterations, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_nonsense() {
        let mut config = LsperfConfig::default();
        config.runner.iterations = 0;
        assert!(config.validate().is_err());

        let mut config = LsperfConfig::default();
        config.runner.call_timeout = "0s".to_string();
        assert!(config.validate().is_err());

        let mut config = LsperfConfig::default();
        config.output.format = "html".to_string();
        assert!(config.validate().is_err());

        let mut config = LsperfConfig::default();
        config.comparison.alert_threshold = 0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[runner]\njobs = 2\n").unwrap();
        let config = LsperfConfig::load(&path).unwrap();
        assert_eq!(config.runner.jobs, Some(2));
        assert_eq!(config.runner.pool_config().unwrap().jobs, 2);
    }
}
