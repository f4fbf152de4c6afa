//! Integration tests for lsperf
//!
//! These tests drive the whole pipeline in-process: sampling, the worker pool,
//! the real measurement protocol, aggregation, significance and verdicts.
//! Workers are threads instead of processes so no binary is needed.

use crossbeam_channel::Sender;
use lsperf::{
    BenchmarkDocument, BenchmarkRequest, DocumentKey, DocumentStore, Identifier, JsonFileStore,
    LanguageSession, Orchestrator, OrchestratorError, OverallChange, PackageResolver, PoolConfig,
    ResolvedPackage, ServiceError, SignificanceConfig, SourceFile, SupervisorError,
    SystemFingerprint, Toolchain, ToolchainRegistry, WorkerPool, WorkerSpawner,
    compare_documents, overall_change_for_comparisons, render_markdown, summarize,
};
use lsperf_cli::{PoolEvent, PoolWorker, WorkerEvent};
use lsperf_core::MeasurementProtocol;
use lsperf_ipc::{
    BatchCompileResult, FailureKind, RelationCacheSizes, WorkerMessage, WorkerRequest,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Fake language service

struct SleepySession {
    completions_delay: Duration,
}

impl LanguageSession for SleepySession {
    fn completions_at(&mut self, _file: &str, _offset: u32) -> Result<(), ServiceError> {
        std::thread::sleep(self.completions_delay);
        Ok(())
    }

    fn quick_info_at(&mut self, _file: &str, _offset: u32) -> Result<(), ServiceError> {
        Ok(())
    }
}

struct FakeToolchain {
    version: &'static str,
    completions_delay: Duration,
}

fn source(path: &str, is_test: bool, is_declaration: bool, count: u32) -> SourceFile {
    SourceFile {
        path: path.to_string(),
        is_declaration,
        is_test,
        identifiers: (0..count)
            .map(|i| Identifier {
                text: format!("ident{i}"),
                offset: i * 12,
                line: i + 1,
                column: 5,
            })
            .collect(),
    }
}

impl Toolchain for FakeToolchain {
    fn version(&self) -> &str {
        self.version
    }

    // Two test files with 10 identifiers between them, plus files that never count
    fn project_files(&self, _package_dir: &Path) -> Result<Vec<SourceFile>, ServiceError> {
        Ok(vec![
            source("src/index.ts", false, false, 40),
            source("test/a.test.ts", true, false, 4),
            source("test/types.d.ts", true, true, 3),
            source("test/b.test.ts", true, false, 6),
        ])
    }

    fn open_session(&self, _package_dir: &Path) -> Result<Box<dyn LanguageSession>, ServiceError> {
        Ok(Box::new(SleepySession {
            completions_delay: self.completions_delay,
        }))
    }

    fn batch_compile(&self, _package_dir: &Path) -> Result<BatchCompileResult, ServiceError> {
        Ok(BatchCompileResult {
            type_count: 12_000,
            memory_usage: 96 << 20,
            relation_cache_sizes: RelationCacheSizes {
                assignable: 800,
                identity: 40,
                subtype: 300,
                strict_subtype: 20,
            },
            unresolved_modules: Vec::new(),
        })
    }
}

fn registry() -> Arc<ToolchainRegistry> {
    Arc::new(
        ToolchainRegistry::new()
            .register(FakeToolchain {
                version: "5.3",
                completions_delay: Duration::from_millis(1),
            })
            .register(FakeToolchain {
                version: "5.4",
                completions_delay: Duration::from_millis(8),
            }),
    )
}

struct VirtualResolver;

impl PackageResolver for VirtualResolver {
    fn resolve(&self, name: &str, version: &str) -> Result<ResolvedPackage, OrchestratorError> {
        Ok(ResolvedPackage {
            directory: PathBuf::from(format!("/virtual/{name}/{version}")),
            source_version: None,
        })
    }
}

// ---------------------------------------------------------------------------
// In-process workers running the real measurement protocol

struct ThreadWorker {
    requests: Option<crossbeam_channel::Sender<WorkerRequest>>,
    handle: Option<JoinHandle<()>>,
}

impl PoolWorker for ThreadWorker {
    fn send(&mut self, request: &WorkerRequest) -> Result<(), SupervisorError> {
        self.requests
            .as_ref()
            .and_then(|tx| tx.send(request.clone()).ok())
            .ok_or_else(|| SupervisorError::IpcError("worker thread gone".to_string()))
    }

    fn kill(&mut self) {
        self.requests = None;
    }

    fn shutdown(mut self: Box<Self>) {
        self.requests = None;
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Spawns worker threads; the first request for `die_on` kills its worker.
struct ThreadSpawner {
    registry: Arc<ToolchainRegistry>,
    die_on: Option<(String, u32)>,
    died: Arc<AtomicBool>,
}

impl ThreadSpawner {
    fn new(registry: Arc<ToolchainRegistry>) -> Self {
        Self {
            registry,
            die_on: None,
            died: Arc::default(),
        }
    }
}

impl WorkerSpawner for ThreadSpawner {
    fn spawn(
        &mut self,
        slot: usize,
        generation: u64,
        events: Sender<PoolEvent>,
    ) -> Result<Box<dyn PoolWorker>, SupervisorError> {
        let (tx, rx) = crossbeam_channel::unbounded::<WorkerRequest>();
        let registry = Arc::clone(&self.registry);
        let die_on = self.die_on.clone();
        let died = Arc::clone(&self.died);

        let handle = std::thread::spawn(move || {
            let emit = |event| {
                let _ = events.send(PoolEvent {
                    slot,
                    generation,
                    event,
                });
            };
            let mut protocol = MeasurementProtocol::new(&registry);
            for request in rx {
                let message = match request {
                    WorkerRequest::Measure(input) => {
                        let key = (input.file.clone(), input.offset);
                        if die_on.as_ref() == Some(&key) && !died.swap(true, Ordering::SeqCst) {
                            emit(WorkerEvent::Exited("simulated crash".to_string()));
                            return;
                        }
                        match protocol.measure(&input) {
                            Ok(m) => WorkerMessage::Measured(m),
                            Err(e) => WorkerMessage::Failure {
                                kind: FailureKind::Service,
                                message: e.to_string(),
                            },
                        }
                    }
                    WorkerRequest::BatchCompile(input) => match protocol.batch_compile(&input) {
                        Ok(result) => WorkerMessage::BatchCompiled(result),
                        Err(e) => WorkerMessage::Failure {
                            kind: FailureKind::Service,
                            message: e.to_string(),
                        },
                    },
                    WorkerRequest::Shutdown => return,
                };
                emit(WorkerEvent::Message(message));
            }
        });

        Ok(Box::new(ThreadWorker {
            requests: Some(tx),
            handle: Some(handle),
        }))
    }
}

// ---------------------------------------------------------------------------
// Helpers

fn pool_config() -> PoolConfig {
    PoolConfig {
        jobs: 2,
        call_timeout: Duration::from_secs(10),
        max_run_time: None,
        crash_recovery: true,
    }
}

fn request(toolchain: &str) -> BenchmarkRequest {
    BenchmarkRequest {
        package_name: "left-pad".to_string(),
        package_version: "1.3.0".to_string(),
        toolchain_version: toolchain.to_string(),
        iterations: 3,
        max_positions: Some(5),
    }
}

fn fingerprint() -> SystemFingerprint {
    SystemFingerprint {
        os: "linux".to_string(),
        os_version: "6.8".to_string(),
        arch: "x86_64".to_string(),
        cpu: "Test CPU".to_string(),
        cpu_cores: 8,
        memory_gb: 32.0,
    }
}

fn run_document(registry: &Arc<ToolchainRegistry>, toolchain: &str) -> BenchmarkDocument {
    let pool = WorkerPool::new(ThreadSpawner::new(Arc::clone(registry)), pool_config());
    let mut orchestrator = Orchestrator::new(registry, &VirtualResolver, pool);
    let benchmark = orchestrator
        .run_package(&request(toolchain), |_, _| {})
        .unwrap();
    BenchmarkDocument::new(summarize(&benchmark), fingerprint())
}

// ---------------------------------------------------------------------------
// Tests

/// 2 files, 10 identifiers, cap 5, 3 iterations: 5 positions with 3 trials each
#[test]
fn test_end_to_end_scenario() {
    let registry = registry();
    let pool = WorkerPool::new(ThreadSpawner::new(Arc::clone(&registry)), pool_config());
    let mut orchestrator = Orchestrator::new(&registry, &VirtualResolver, pool);

    let mut progress = Vec::new();
    let benchmark = orchestrator
        .run_package(&request("5.4"), |done, total| progress.push((done, total)))
        .unwrap();

    assert_eq!(benchmark.run.identifier_count, 10);
    assert_eq!(benchmark.run.requested_iterations, 3);
    assert_eq!(benchmark.positions.len(), 5);
    for position in &benchmark.positions {
        assert!(position.file.ends_with(".test.ts"));
        assert_eq!(position.completions_durations.len(), 3);
        assert_eq!(position.quick_info_durations.len(), 3);
        assert!(position.completions_durations.iter().all(|&ms| ms >= 8.0));
    }
    assert!(!benchmark.run.language_service_crashed);
    assert!(!benchmark.run.timed_out);
    assert_eq!(benchmark.batch.map(|b| b.type_count), Some(12_000));
    assert_eq!(progress.last(), Some(&(15, 15)));

    let summary = summarize(&benchmark);
    let completions = summary.completions.as_ref().unwrap();
    assert_eq!(completions.trials, 5);
    assert!(completions.mean >= 8.0);
    assert!(completions.median >= 8.0);
    assert_eq!(completions.worst.completions_durations.len(), 3);
}

#[test]
fn test_sampling_is_deterministic_across_runs() {
    let registry = registry();
    let keys = || {
        let pool = WorkerPool::new(ThreadSpawner::new(Arc::clone(&registry)), pool_config());
        let mut orchestrator = Orchestrator::new(&registry, &VirtualResolver, pool);
        let benchmark = orchestrator.run_package(&request("5.3"), |_, _| {}).unwrap();
        let mut keys: Vec<(String, u32)> = benchmark
            .positions
            .iter()
            .map(|p| (p.file.clone(), p.offset))
            .collect();
        keys.sort();
        keys
    };
    let first = keys();
    assert_eq!(first.len(), 5);
    assert_eq!(first, keys());
}

#[test]
fn test_crash_costs_only_the_crashed_trial() {
    let registry = registry();
    let mut spawner = ThreadSpawner::new(Arc::clone(&registry));
    // First sampled position: the start band always keeps the first identifier
    spawner.die_on = Some(("test/a.test.ts".to_string(), 0));
    let died = Arc::clone(&spawner.died);

    let pool = WorkerPool::new(spawner, pool_config());
    let mut orchestrator = Orchestrator::new(&registry, &VirtualResolver, pool);
    let benchmark = orchestrator.run_package(&request("5.4"), |_, _| {}).unwrap();

    assert!(died.load(Ordering::SeqCst));
    assert!(benchmark.run.language_service_crashed);
    assert_eq!(benchmark.positions.len(), 5);
    let trials: usize = benchmark.positions.iter().map(|p| p.trial_count()).sum();
    assert_eq!(trials, 5 * 3 - 1);

    let crashed = benchmark
        .positions
        .iter()
        .find(|p| p.file == "test/a.test.ts" && p.offset == 0)
        .unwrap();
    assert_eq!(crashed.trial_count(), 2);

    // Fewer trials are still summarizable
    let summary = summarize(&benchmark);
    assert_eq!(summary.completions.unwrap().trials, 5);
}

#[test]
fn test_fail_fast_aborts_on_crash() {
    let registry = registry();
    let mut spawner = ThreadSpawner::new(Arc::clone(&registry));
    spawner.die_on = Some(("test/a.test.ts".to_string(), 0));

    let config = PoolConfig {
        crash_recovery: false,
        ..pool_config()
    };
    let pool = WorkerPool::new(spawner, config);
    let mut orchestrator = Orchestrator::new(&registry, &VirtualResolver, pool);
    let result = orchestrator.run_package(&request("5.4"), |_, _| {});
    assert!(matches!(
        result,
        Err(OrchestratorError::Supervisor(
            SupervisorError::WorkerCrashed { .. }
        ))
    ));
}

#[test]
fn test_slower_toolchain_is_flagged_worse() {
    let registry = registry();
    let before = run_document(&registry, "5.3");
    let after = run_document(&registry, "5.4");

    let outcome = compare_documents(
        Some(before),
        after,
        &fingerprint(),
        &SignificanceConfig::default(),
    );
    let change = outcome.change.unwrap();
    assert!(change.is_worse());
    assert!(!change.is_better());

    let flagged: Vec<&str> = outcome.interesting().map(|m| m.metric.name).collect();
    assert!(flagged.contains(&"Completions: mean"));
    // Identical batch compiles never count
    assert!(!flagged.iter().any(|name| name.contains("cache") || *name == "Type count"));
    // Quick-info stays under the latency floor
    assert!(!flagged.iter().any(|name| name.starts_with("Quick info")));

    let md = render_markdown(&outcome);
    assert!(md.contains("### left-pad@1.3.0 (5.4)"));
    assert!(md.contains("Compared against toolchain 5.3"));

    assert_eq!(overall_change_for_comparisons(&[change]), Some(change));
}

#[test]
fn test_same_toolchain_has_no_batch_change() {
    let registry = registry();
    let before = run_document(&registry, "5.3");
    let after = run_document(&registry, "5.3");
    let outcome = compare_documents(
        Some(before),
        after,
        &fingerprint(),
        &SignificanceConfig::default(),
    );
    // 1ms timings are below every latency floor
    assert_eq!(outcome.change, Some(OverallChange::SAME));
    assert_eq!(outcome.interesting().count(), 0);
}

#[test]
fn test_run_verdict_folds_comparisons() {
    assert_eq!(overall_change_for_comparisons(&[]), None);
    assert_eq!(
        overall_change_for_comparisons(&[OverallChange::WORSE, OverallChange::BETTER]),
        Some(OverallChange::MIXED)
    );
    assert_eq!(
        overall_change_for_comparisons(&[OverallChange::SAME, OverallChange::SAME]),
        Some(OverallChange::SAME)
    );
}

#[test]
fn test_store_feeds_next_comparison() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = JsonFileStore::new(dir.path());
    let registry = registry();

    let first = run_document(&registry, "5.4");
    let key = DocumentKey::new("left-pad", "1.3.0", "5.4");
    assert!(store.get_latest(&key).unwrap().is_none());
    store.insert(&first).unwrap();

    let second = run_document(&registry, "5.4");
    let before = store.get_latest(&key).unwrap();
    assert_eq!(before.as_ref().map(|d| &d.summary), Some(&first.summary));

    let outcome = compare_documents(
        before,
        second,
        &fingerprint(),
        &SignificanceConfig::default(),
    );
    assert!(outcome.before.is_some());
    assert!(outcome.change.is_some());
}

#[test]
fn test_incompatible_machine_yields_single_run() {
    let registry = registry();
    let before = run_document(&registry, "5.3");
    let after = run_document(&registry, "5.4");
    let other_machine = SystemFingerprint {
        cpu: "Other CPU".to_string(),
        ..fingerprint()
    };
    let before = BenchmarkDocument {
        meta: lsperf_report::DocumentMeta {
            system: other_machine,
            ..before.meta
        },
        ..before
    };

    let outcome = compare_documents(
        Some(before),
        after,
        &fingerprint(),
        &SignificanceConfig::default(),
    );
    assert_eq!(outcome.change, None);
    assert!(outcome.before.is_none());
    assert!(render_markdown(&outcome).contains("single-run results"));
}
