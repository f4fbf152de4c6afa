//! Benchmark Orchestrator
//!
//! Runs one package version under one toolchain: resolve the package, sample
//! positions, batch-compile it in a throwaway worker, then drive the pool over
//! the trial matrix and assemble the raw [`PackageBenchmark`].

use crate::arena::PositionArena;
use crate::supervisor::{SupervisorError, WorkerPool, WorkerSpawner, run_one_shot};
use lsperf_core::{
    SamplePosition, ServiceError, ToolchainRegistry, measurable_identifier_count,
    sample_package_positions,
};
use lsperf_ipc::{
    BatchCompileMeasurement, BatchCompileResult, PositionMeasurement, WorkerMessage, WorkerRequest,
};
use lsperf_report::{BatchMetrics, PackageBenchmark, PositionBenchmark, RunInfo};
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Failed to resolve {package}: {message}")]
    Resolve { package: String, message: String },

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error("{package} has unresolved modules: {}", modules.join(", "))]
    UnresolvedModules {
        package: String,
        modules: Vec<String>,
    },

    #[error("Batch compile failed: {0}")]
    BatchCompile(String),
}

/// A package ready to be compiled
#[derive(Debug, Clone)]
pub struct ResolvedPackage {
    /// Directory with the package and its installed dependencies
    pub directory: PathBuf,
    /// Revision of the package's sources, when known
    pub source_version: Option<String>,
}

/// Locates a package version on disk, installing dependencies as needed.
pub trait PackageResolver {
    fn resolve(&self, name: &str, version: &str) -> Result<ResolvedPackage, OrchestratorError>;
}

/// Resolves `<root>/<name>/<version>` with no install step.
///
/// A `.source-version` file in the package directory, if present, supplies
/// the source revision.
#[derive(Debug, Clone)]
pub struct DirectoryResolver {
    root: PathBuf,
}

impl DirectoryResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl PackageResolver for DirectoryResolver {
    fn resolve(&self, name: &str, version: &str) -> Result<ResolvedPackage, OrchestratorError> {
        let directory = self.root.join(name).join(version);
        if !directory.is_dir() {
            return Err(OrchestratorError::Resolve {
                package: format!("{name}@{version}"),
                message: format!("{} is not a directory", directory.display()),
            });
        }
        let source_version = std::fs::read_to_string(directory.join(".source-version"))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        Ok(ResolvedPackage {
            directory,
            source_version,
        })
    }
}

/// What to benchmark
#[derive(Debug, Clone)]
pub struct BenchmarkRequest {
    pub package_name: String,
    pub package_version: String,
    pub toolchain_version: String,
    /// Trials per sampled position
    pub iterations: usize,
    /// Package-wide cap on sampled positions
    pub max_positions: Option<usize>,
}

impl BenchmarkRequest {
    fn package_label(&self) -> String {
        format!("{}@{}", self.package_name, self.package_version)
    }
}

/// Trial-major work list: every position once per trial, trials in order.
pub fn build_matrix(
    positions: &[SamplePosition],
    iterations: usize,
    package_directory: &str,
    toolchain_version: &str,
) -> Vec<PositionMeasurement> {
    (0..iterations)
        .flat_map(|_| {
            positions.iter().map(|p| PositionMeasurement {
                file: p.file.clone(),
                offset: p.offset,
                package_directory: package_directory.to_string(),
                toolchain_version: toolchain_version.to_string(),
            })
        })
        .collect()
}

/// Drives package runs through a worker pool
pub struct Orchestrator<'a, S: WorkerSpawner> {
    registry: &'a ToolchainRegistry,
    resolver: &'a dyn PackageResolver,
    pool: WorkerPool<S>,
}

impl<'a, S: WorkerSpawner> Orchestrator<'a, S> {
    pub fn new(
        registry: &'a ToolchainRegistry,
        resolver: &'a dyn PackageResolver,
        pool: WorkerPool<S>,
    ) -> Self {
        Self {
            registry,
            resolver,
            pool,
        }
    }

    /// Benchmark one package version under one toolchain.
    ///
    /// `progress(done, total)` follows the measurement trials.
    pub fn run_package(
        &mut self,
        request: &BenchmarkRequest,
        progress: impl FnMut(usize, usize),
    ) -> Result<PackageBenchmark, OrchestratorError> {
        let package = request.package_label();
        let resolved = self
            .resolver
            .resolve(&request.package_name, &request.package_version)?;
        let toolchain = self.registry.get(&request.toolchain_version)?;
        let files = toolchain.project_files(&resolved.directory)?;

        let identifier_count = measurable_identifier_count(&files);
        let sampled = sample_package_positions(&files, request.max_positions);
        tracing::info!(
            package = %package,
            toolchain = %request.toolchain_version,
            identifiers = identifier_count,
            positions = sampled.len(),
            iterations = request.iterations,
            "starting package benchmark"
        );

        let directory = resolved.directory.to_string_lossy().into_owned();
        let batch = self.batch_compile(&package, &directory, &request.toolchain_version)?;
        let batch_lost = batch.is_none();

        let mut arena = PositionArena::new(sampled.iter().map(|p| {
            PositionBenchmark::new(
                p.file.clone(),
                p.offset,
                p.identifier_text.clone(),
                p.line,
                p.column,
            )
        }));
        let inputs = build_matrix(
            &sampled,
            request.iterations,
            &directory,
            &request.toolchain_version,
        );

        let started = Instant::now();
        let outcome = self.pool.run(inputs, &mut arena, progress)?;
        let benchmark_duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        if outcome.crashed {
            tracing::warn!(
                package = %package,
                failed = outcome.failed,
                late = outcome.late,
                workers_spawned = outcome.workers_spawned,
                "some measurements were lost to worker failures"
            );
        }

        let positions = arena.into_non_empty();
        if positions.is_empty() && identifier_count > 0 {
            tracing::warn!(package = %package, "no position produced a measurement");
        }

        Ok(PackageBenchmark {
            run: RunInfo {
                package_name: request.package_name.clone(),
                package_version: request.package_version.clone(),
                toolchain_version: request.toolchain_version.clone(),
                source_version: resolved.source_version,
                requested_iterations: request.iterations,
                identifier_count,
                benchmark_duration_ms,
                language_service_crashed: outcome.crashed || batch_lost,
                timed_out: outcome.timed_out,
            },
            batch: batch.as_ref().map(BatchMetrics::from),
            positions,
        })
    }

    /// Batch compile in a dedicated worker, never one of the pool's.
    ///
    /// Unresolved modules always fail the package. A crash, timeout or
    /// failure reply of the batch worker fails it only in fail-fast mode;
    /// otherwise the run continues without batch metrics.
    fn batch_compile(
        &mut self,
        package: &str,
        directory: &str,
        toolchain_version: &str,
    ) -> Result<Option<BatchCompileResult>, OrchestratorError> {
        let request = WorkerRequest::BatchCompile(BatchCompileMeasurement {
            package_directory: directory.to_string(),
            toolchain_version: toolchain_version.to_string(),
        });
        let timeout = self.pool.config().call_timeout;
        let reply = run_one_shot(self.pool.spawner_mut(), &request, timeout)
            .map_err(OrchestratorError::from)
            .and_then(|message| match message {
                WorkerMessage::BatchCompiled(result) => Ok(result),
                WorkerMessage::Failure { message, .. } => {
                    Err(OrchestratorError::BatchCompile(message))
                }
                other => Err(SupervisorError::ProtocolError {
                    expected: "BatchCompiled".to_string(),
                    got: format!("{other:?}"),
                }
                .into()),
            });

        let result = match reply {
            Ok(result) => result,
            Err(e) if self.pool.config().crash_recovery => {
                tracing::warn!(
                    package,
                    error = %e,
                    "batch compile lost, continuing without batch metrics"
                );
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if !result.unresolved_modules.is_empty() {
            return Err(OrchestratorError::UnresolvedModules {
                package: package.to_string(),
                modules: result.unresolved_modules,
            });
        }
        tracing::debug!(
            package,
            type_count = result.type_count,
            memory_usage = result.memory_usage,
            "batch compile finished"
        );
        Ok(Some(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::PoolConfig;
    use crate::supervisor::tests::{FakeSpawner, Reply};
    use lsperf_core::{Identifier, LanguageSession, SourceFile, Toolchain};
    use lsperf_ipc::RelationCacheSizes;
    use std::path::Path;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    struct FakeToolchain {
        files: Vec<SourceFile>,
    }

    impl Toolchain for FakeToolchain {
        fn version(&self) -> &str {
            "5.4"
        }

        fn project_files(&self, _package_dir: &Path) -> Result<Vec<SourceFile>, ServiceError> {
            Ok(self.files.clone())
        }

        fn open_session(
            &self,
            _package_dir: &Path,
        ) -> Result<Box<dyn LanguageSession>, ServiceError> {
            Err(ServiceError::Compile("not in the supervisor".to_string()))
        }

        fn batch_compile(&self, _package_dir: &Path) -> Result<BatchCompileResult, ServiceError> {
            Err(ServiceError::Compile("not in the supervisor".to_string()))
        }
    }

    struct FixedResolver;

    impl PackageResolver for FixedResolver {
        fn resolve(&self, name: &str, version: &str) -> Result<ResolvedPackage, OrchestratorError> {
            if name == "missing" {
                return Err(OrchestratorError::Resolve {
                    package: format!("{name}@{version}"),
                    message: "not published".to_string(),
                });
            }
            Ok(ResolvedPackage {
                directory: PathBuf::from(format!("/pkgs/{name}/{version}")),
                source_version: Some("abc123".to_string()),
            })
        }
    }

    fn file(path: &str, is_test: bool, count: u32) -> SourceFile {
        SourceFile {
            path: path.to_string(),
            is_declaration: false,
            is_test,
            identifiers: (0..count)
                .map(|i| Identifier {
                    text: format!("id{i}"),
                    offset: i * 10,
                    line: i + 1,
                    column: 1,
                })
                .collect(),
        }
    }

    fn registry() -> ToolchainRegistry {
        ToolchainRegistry::new().register(FakeToolchain {
            files: vec![
                file("src/index.ts", false, 50),
                file("test/a.test.ts", true, 4),
                file("test/b.test.ts", true, 6),
            ],
        })
    }

    fn batch(unresolved: &[&str]) -> BatchCompileResult {
        BatchCompileResult {
            type_count: 4_200,
            memory_usage: 64 << 20,
            relation_cache_sizes: RelationCacheSizes {
                assignable: 10,
                identity: 2,
                subtype: 5,
                strict_subtype: 1,
            },
            unresolved_modules: unresolved.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn request(name: &str) -> BenchmarkRequest {
        BenchmarkRequest {
            package_name: name.to_string(),
            package_version: "1.0".to_string(),
            toolchain_version: "5.4".to_string(),
            iterations: 3,
            max_positions: Some(5),
        }
    }

    fn pool(spawner: FakeSpawner) -> WorkerPool<FakeSpawner> {
        WorkerPool::new(
            spawner,
            PoolConfig {
                jobs: 2,
                call_timeout: Duration::from_secs(5),
                max_run_time: None,
                crash_recovery: true,
            },
        )
    }

    #[test]
    fn test_build_matrix_is_trial_major() {
        let positions: Vec<SamplePosition> = (0..3)
            .map(|i| SamplePosition {
                file: "a.test.ts".to_string(),
                offset: i,
                identifier_text: "x".to_string(),
                line: 1,
                column: i + 1,
            })
            .collect();
        let matrix = build_matrix(&positions, 2, "/pkgs/a", "5.4");
        let offsets: Vec<u32> = matrix.iter().map(|m| m.offset).collect();
        assert_eq!(offsets, vec![0, 1, 2, 0, 1, 2]);
        assert!(matrix.iter().all(|m| m.toolchain_version == "5.4"));
    }

    #[test]
    fn test_run_package_end_to_end() {
        let registry = registry();
        let spawner = FakeSpawner::new(|_, _| Reply::Measure(12.0)).with_batch(batch(&[]));
        let sent = spawner.sent.clone();
        let mut orchestrator = Orchestrator::new(&registry, &FixedResolver, pool(spawner));

        let mut last = (0, 0);
        let benchmark = orchestrator
            .run_package(&request("react"), |done, total| last = (done, total))
            .unwrap();

        assert_eq!(benchmark.run.identifier_count, 10);
        assert_eq!(benchmark.run.source_version.as_deref(), Some("abc123"));
        let batch = benchmark.batch.unwrap();
        assert_eq!(batch.type_count, 4_200);
        assert_eq!(batch.relation_cache_sizes.assignable, 10);
        assert_eq!(benchmark.positions.len(), 5);
        assert!(benchmark.positions.iter().all(|p| p.trial_count() == 3));
        assert!(
            benchmark
                .positions
                .iter()
                .all(|p| p.file.ends_with(".test.ts"))
        );
        assert!(!benchmark.run.language_service_crashed);
        assert_eq!(sent.lock().unwrap().len(), 15);
        assert_eq!(last, (15, 15));
    }

    #[test]
    fn test_unresolved_modules_abort_before_measuring() {
        let registry = registry();
        let spawner =
            FakeSpawner::new(|_, _| Reply::Measure(1.0)).with_batch(batch(&["left-pad"]));
        let sent = spawner.sent.clone();
        let mut orchestrator = Orchestrator::new(&registry, &FixedResolver, pool(spawner));

        let err = orchestrator
            .run_package(&request("react"), |_, _| {})
            .unwrap_err();
        match err {
            OrchestratorError::UnresolvedModules { package, modules } => {
                assert_eq!(package, "react@1.0");
                assert_eq!(modules, vec!["left-pad"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_lost_batch_compile_keeps_measuring() {
        let registry = registry();
        // No batch reply: the one-shot worker hangs until the call timeout
        let spawner = FakeSpawner::new(|_, _| Reply::Measure(3.0));
        let sent = spawner.sent.clone();
        let pool = WorkerPool::new(
            spawner,
            PoolConfig {
                jobs: 2,
                call_timeout: Duration::from_millis(50),
                max_run_time: None,
                crash_recovery: true,
            },
        );
        let mut orchestrator = Orchestrator::new(&registry, &FixedResolver, pool);

        let benchmark = orchestrator
            .run_package(&request("react"), |_, _| {})
            .unwrap();
        assert_eq!(benchmark.batch, None);
        assert!(benchmark.run.language_service_crashed);
        assert_eq!(benchmark.positions.len(), 5);
        assert_eq!(sent.lock().unwrap().len(), 15);
    }

    #[test]
    fn test_lost_batch_compile_fails_fast() {
        let registry = registry();
        let spawner = FakeSpawner::new(|_, _| Reply::Measure(3.0));
        let sent = spawner.sent.clone();
        let pool = WorkerPool::new(
            spawner,
            PoolConfig {
                jobs: 1,
                call_timeout: Duration::from_millis(50),
                max_run_time: None,
                crash_recovery: false,
            },
        );
        let mut orchestrator = Orchestrator::new(&registry, &FixedResolver, pool);

        assert!(matches!(
            orchestrator.run_package(&request("react"), |_, _| {}),
            Err(OrchestratorError::Supervisor(SupervisorError::Timeout))
        ));
        assert!(sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_crashes_degrade_trials() {
        let registry = registry();
        let spawner = FakeSpawner::new(|input, attempt| {
            if input.offset == 0 && attempt == 2 {
                Reply::Crash
            } else {
                Reply::Measure(5.0)
            }
        })
        .with_batch(batch(&[]));
        let spawned = spawner.spawned.clone();
        let mut orchestrator = Orchestrator::new(&registry, &FixedResolver, pool(spawner));

        let benchmark = orchestrator
            .run_package(&request("react"), |_, _| {})
            .unwrap();
        assert!(benchmark.run.language_service_crashed);
        let trials: usize = benchmark.positions.iter().map(|p| p.trial_count()).sum();
        // offset 0 appears in both test files
        assert_eq!(trials, 15 - 2);
        assert!(spawned.load(Ordering::SeqCst) > 2);
    }

    #[test]
    fn test_resolve_failure_propagates() {
        let registry = registry();
        let spawner = FakeSpawner::new(|_, _| Reply::Measure(1.0)).with_batch(batch(&[]));
        let mut orchestrator = Orchestrator::new(&registry, &FixedResolver, pool(spawner));
        assert!(matches!(
            orchestrator.run_package(&request("missing"), |_, _| {}),
            Err(OrchestratorError::Resolve { .. })
        ));
    }

    #[test]
    fn test_unknown_toolchain() {
        let registry = registry();
        let spawner = FakeSpawner::new(|_, _| Reply::Measure(1.0)).with_batch(batch(&[]));
        let mut orchestrator = Orchestrator::new(&registry, &FixedResolver, pool(spawner));
        let mut req = request("react");
        req.toolchain_version = "3.9".to_string();
        assert!(matches!(
            orchestrator.run_package(&req, |_, _| {}),
            Err(OrchestratorError::Service(ServiceError::UnknownToolchain(_)))
        ));
    }

    #[test]
    fn test_directory_resolver() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = dir.path().join("react").join("18.2");
        std::fs::create_dir_all(&pkg).unwrap();
        std::fs::write(pkg.join(".source-version"), "deadbeef\n").unwrap();

        let resolver = DirectoryResolver::new(dir.path());
        let resolved = resolver.resolve("react", "18.2").unwrap();
        assert_eq!(resolved.directory, pkg);
        assert_eq!(resolved.source_version.as_deref(), Some("deadbeef"));
        assert!(resolver.resolve("react", "17.0").is_err());
    }
}
