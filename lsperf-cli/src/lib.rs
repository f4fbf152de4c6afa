//! lsperf CLI Library
//!
//! Entry point for binaries that embed one or more toolchains. The same binary
//! serves as the supervisor and, when started with `--lsperf-worker`, as a
//! measurement worker.
//!
//! # Example
//!
//! ```ignore
//! use lsperf::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let registry = ToolchainRegistry::new().register(MyToolchain::new("5.4"));
//!     lsperf_cli::run(&registry)
//! }
//! ```

mod arena;
mod config;
mod formatting;
mod manifest;
mod metadata;
mod orchestrator;
mod planner;
mod supervisor;

pub use arena::PositionArena;
pub use config::*;
pub use formatting::format_human_output;
pub use manifest::{JobManifest, PackageSpec};
pub use metadata::capture_fingerprint;
pub use orchestrator::{
    BenchmarkRequest, DirectoryResolver, Orchestrator, OrchestratorError, PackageResolver,
    ResolvedPackage, build_matrix,
};
pub use planner::{BenchmarkJob, RunPlan, build_plan};
pub use supervisor::*;

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use lsperf_core::{ToolchainRegistry, WorkerMain};
use lsperf_logic::{
    ComparisonOutcome, OverallChange, compare_documents, overall_change_for_comparisons,
    render_markdown,
};
use lsperf_report::{
    BenchmarkDocument, DocumentKey, DocumentStore, JsonFileStore, OutputFormat, RunReport,
    generate_json_report, summarize,
};
use regex::Regex;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

/// lsperf CLI arguments
#[derive(Parser, Debug)]
#[command(name = "lsperf")]
#[command(
    author,
    version,
    about = "lsperf - language-service performance regression checks"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Output format: human, json, markdown (defaults to lsperf.toml)
    #[arg(long, global = true)]
    pub format: Option<String>,

    /// Output file (stdout if not specified)
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    /// Document store directory (defaults to lsperf.toml)
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Internal: Run as worker process (used by supervisor)
    #[arg(long, hide = true)]
    pub lsperf_worker: bool,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Benchmark every package in a job manifest
    Run {
        /// Job manifest (TOML)
        manifest: PathBuf,

        /// Only run packages whose name matches this regex
        #[arg(long)]
        filter: Option<String>,

        /// Directory holding `<name>/<version>` package checkouts
        #[arg(long, default_value = "packages")]
        packages_dir: PathBuf,

        /// Trials per sampled position
        #[arg(long, short = 'n')]
        iterations: Option<usize>,

        /// Package-wide cap on sampled positions
        #[arg(long)]
        max_positions: Option<usize>,

        /// Number of parallel workers
        #[arg(long, short = 'j')]
        jobs: Option<usize>,

        /// Budget for one worker request (e.g. "60s")
        #[arg(long)]
        call_timeout: Option<String>,

        /// Soft deadline per package (e.g. "10m")
        #[arg(long)]
        max_run_time: Option<String>,

        /// Abort on the first worker failure instead of replacing the worker
        #[arg(long)]
        fail_fast: bool,

        /// Do not write results to the document store
        #[arg(long)]
        no_save: bool,
    },
    /// Compare two stored documents for one package version
    Compare {
        /// Package name
        package: String,
        /// Package version
        version: String,
        /// Toolchain of the "after" document
        #[arg(long)]
        toolchain: String,
        /// Toolchain of the "before" document
        #[arg(long)]
        baseline: String,
    },
    /// Write a default lsperf.toml to the current directory
    Init,
}

/// Run the lsperf CLI with the toolchains this binary embeds.
pub fn run(registry: &ToolchainRegistry) -> anyhow::Result<()> {
    let cli = Cli::parse();
    run_with_cli(cli, registry, None)
}

/// Run the lsperf CLI with pre-parsed arguments.
///
/// `resolver` replaces the default [`DirectoryResolver`] over `--packages-dir`.
pub fn run_with_cli(
    cli: Cli,
    registry: &ToolchainRegistry,
    resolver: Option<&dyn PackageResolver>,
) -> anyhow::Result<()> {
    // Handle worker mode first (before any other initialization)
    if cli.lsperf_worker {
        return run_worker_mode(registry);
    }

    let filter = if cli.verbose {
        "lsperf=debug"
    } else {
        "lsperf=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = LsperfConfig::discover().unwrap_or_default();
    if let Some(format) = &cli.format {
        config.output.format = format.clone();
    }
    if let Some(store) = &cli.store {
        config.output.store_directory = store.to_string_lossy().into_owned();
    }

    match cli.command {
        Some(Commands::Run {
            ref manifest,
            ref filter,
            ref packages_dir,
            iterations,
            max_positions,
            jobs,
            ref call_timeout,
            ref max_run_time,
            fail_fast,
            no_save,
        }) => {
            let manifest = JobManifest::load(manifest)?;
            if let Some(runner) = &manifest.runner {
                config.runner = runner.clone();
            }
            config.runner.iterations = iterations.unwrap_or(config.runner.iterations);
            config.runner.max_positions = max_positions.or(config.runner.max_positions);
            config.runner.jobs = jobs.or(config.runner.jobs);
            if let Some(timeout) = call_timeout {
                config.runner.call_timeout = timeout.clone();
            }
            if max_run_time.is_some() {
                config.runner.max_run_time = max_run_time.clone();
            }
            if fail_fast {
                config.runner.crash_recovery = false;
            }
            config.validate()?;

            let filter = filter.as_deref().map(Regex::new).transpose()?;
            let plan = build_plan(&manifest, filter.as_ref());
            let default_resolver = DirectoryResolver::new(packages_dir);
            let resolver = resolver.unwrap_or(&default_resolver);
            run_benchmarks(&cli, &config, registry, resolver, &plan, !no_save)
        }
        Some(Commands::Compare {
            ref package,
            ref version,
            ref toolchain,
            ref baseline,
        }) => {
            config.validate()?;
            compare_stored(&cli, &config, package, version, toolchain, baseline)
        }
        Some(Commands::Init) => init_config(),
        None => Err(anyhow::anyhow!(
            "no command given; try `lsperf run <manifest>` or `lsperf --help`"
        )),
    }
}

/// Run as a worker process (IPC mode)
pub fn run_worker_mode(registry: &ToolchainRegistry) -> anyhow::Result<()> {
    // stdout may be the transport when no fds are inherited
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("lsperf=warn")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let mut worker = WorkerMain::new();
    worker
        .run(registry)
        .map_err(|e| anyhow::anyhow!("Worker error: {}", e))
}

fn init_config() -> anyhow::Result<()> {
    let path = Path::new(CONFIG_FILE_NAME);
    if path.exists() {
        return Err(anyhow::anyhow!("{} already exists", path.display()));
    }
    std::fs::write(path, LsperfConfig::default_toml())?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn progress_bar(label: &str) -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb.set_message(label.to_string());
    pb
}

fn run_benchmarks(
    cli: &Cli,
    config: &LsperfConfig,
    registry: &ToolchainRegistry,
    resolver: &dyn PackageResolver,
    plan: &RunPlan,
    save: bool,
) -> anyhow::Result<()> {
    if plan.jobs.is_empty() {
        println!("No packages to benchmark.");
        return Ok(());
    }

    let pool_config = config.runner.pool_config()?;
    eprintln!(
        "Benchmarking {} package run(s), {} worker(s), {} iteration(s)...\n",
        plan.jobs.len(),
        pool_config.jobs,
        config.runner.iterations
    );

    let spawner = ProcessSpawner::current_exe()?.handshake_timeout(pool_config.call_timeout);
    let pool = WorkerPool::new(spawner, pool_config);
    let mut orchestrator = Orchestrator::new(registry, resolver, pool);
    let mut store = JsonFileStore::new(&config.output.store_directory);
    let system = capture_fingerprint();

    // Documents produced this run under the baseline toolchain, by package
    let mut baselines: HashMap<(String, String), BenchmarkDocument> = HashMap::new();
    let mut outcomes = Vec::new();
    let mut documents = Vec::new();
    let mut failures = 0usize;

    for job in &plan.jobs {
        let request = BenchmarkRequest {
            package_name: job.package.name.clone(),
            package_version: job.package.version.clone(),
            toolchain_version: job.toolchain_version.clone(),
            iterations: config.runner.iterations,
            max_positions: config.runner.max_positions,
        };
        let label = format!(
            "{}@{} ({})",
            job.package.name, job.package.version, job.toolchain_version
        );
        let pb = progress_bar(&label);
        let result = orchestrator.run_package(&request, |done, total| {
            pb.set_length(total as u64);
            pb.set_position(done as u64);
        });
        pb.finish_and_clear();

        let benchmark = match result {
            Ok(benchmark) => benchmark,
            Err(e) => {
                tracing::error!(package = %label, error = %e, "package benchmark failed");
                failures += 1;
                continue;
            }
        };

        let document = BenchmarkDocument::new(summarize(&benchmark), system.clone());
        let package_key = (job.package.name.clone(), job.package.version.clone());
        let is_baseline_run = plan.baseline_toolchain.as_deref() == Some(job.toolchain_version.as_str());

        let before = match &plan.baseline_toolchain {
            Some(_) if !is_baseline_run => baselines.get(&package_key).cloned(),
            _ => store.get_latest(&document.key())?,
        };

        if save {
            store.insert(&document)?;
        }
        if is_baseline_run {
            baselines.insert(package_key, document.clone());
        }

        outcomes.push(compare_documents(
            before,
            document.clone(),
            &system,
            &config.comparison,
        ));
        documents.push(document);
    }

    let overall = overall_change_for_comparisons(
        &outcomes.iter().filter_map(|o| o.change).collect::<Vec<_>>(),
    );
    write_output(cli, config, &outcomes, documents, overall)?;

    if failures > 0 {
        eprintln!("\n{} package run(s) failed", failures);
    }
    if failures > 0 || overall.is_some_and(OverallChange::is_worse) {
        std::process::exit(1);
    }
    Ok(())
}

fn compare_stored(
    cli: &Cli,
    config: &LsperfConfig,
    package: &str,
    version: &str,
    toolchain: &str,
    baseline: &str,
) -> anyhow::Result<()> {
    let store = JsonFileStore::new(&config.output.store_directory);
    let after_key = DocumentKey::new(package, version, toolchain);
    let after = store
        .get_latest(&after_key)?
        .ok_or_else(|| anyhow::anyhow!("No stored document for {}", after_key))?;
    let before = store.get_latest(&DocumentKey::new(package, version, baseline))?;
    if before.is_none() {
        eprintln!("Warning: no stored document for toolchain {baseline}; reporting single run");
    }

    let system = after.meta.system.clone();
    let outcome = compare_documents(before, after.clone(), &system, &config.comparison);
    let overall = outcome.change;
    write_output(cli, config, &[outcome], vec![after], overall)?;

    if overall.is_some_and(OverallChange::is_worse) {
        std::process::exit(1);
    }
    Ok(())
}

fn write_output(
    cli: &Cli,
    config: &LsperfConfig,
    outcomes: &[ComparisonOutcome],
    documents: Vec<BenchmarkDocument>,
    overall: Option<OverallChange>,
) -> anyhow::Result<()> {
    let format: OutputFormat = config
        .output
        .format
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    let output = match format {
        OutputFormat::Json => generate_json_report(&RunReport::new(documents))?,
        OutputFormat::Markdown => outcomes
            .iter()
            .map(render_markdown)
            .collect::<Vec<_>>()
            .join("\n"),
        OutputFormat::Human => format_human_output(outcomes, overall),
    };

    if let Some(ref path) = cli.output {
        let mut file = std::fs::File::create(path)?;
        file.write_all(output.as_bytes())?;
        println!("Report written to: {}", path.display());
    } else {
        print!("{}", output);
    }
    Ok(())
}
