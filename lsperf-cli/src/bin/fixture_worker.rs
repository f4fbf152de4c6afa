//! Worker-mode binary over a synthetic toolchain.
//!
//! Drives the real process transport in tests. Measuring a file whose name
//! contains `abort` kills the process; slot [`SILENT_SLOT`] never says `Hello`.

use lsperf_core::{
    Identifier, LanguageSession, ServiceError, SourceFile, Toolchain, ToolchainRegistry,
    WORKER_SLOT_ENV,
};
use lsperf_ipc::{BatchCompileResult, RelationCacheSizes};
use std::path::Path;
use std::time::Duration;

const SILENT_SLOT: &str = "99";

struct SleepSession;

impl LanguageSession for SleepSession {
    fn completions_at(&mut self, file: &str, _offset: u32) -> Result<(), ServiceError> {
        if file.contains("abort") {
            std::process::abort();
        }
        std::thread::sleep(Duration::from_millis(2));
        Ok(())
    }

    fn quick_info_at(&mut self, _file: &str, _offset: u32) -> Result<(), ServiceError> {
        std::thread::sleep(Duration::from_millis(1));
        Ok(())
    }
}

struct FixtureToolchain;

impl Toolchain for FixtureToolchain {
    fn version(&self) -> &str {
        "fixture"
    }

    fn project_files(&self, _package_dir: &Path) -> Result<Vec<SourceFile>, ServiceError> {
        Ok(vec![SourceFile {
            path: "index.test.ts".to_string(),
            is_declaration: false,
            is_test: true,
            identifiers: (0..4)
                .map(|i| Identifier {
                    text: format!("id{i}"),
                    offset: i * 8,
                    line: i + 1,
                    column: 1,
                })
                .collect(),
        }])
    }

    fn open_session(&self, _package_dir: &Path) -> Result<Box<dyn LanguageSession>, ServiceError> {
        Ok(Box::new(SleepSession))
    }

    fn batch_compile(&self, _package_dir: &Path) -> Result<BatchCompileResult, ServiceError> {
        Ok(BatchCompileResult {
            type_count: 1_000,
            memory_usage: 1 << 20,
            relation_cache_sizes: RelationCacheSizes::default(),
            unresolved_modules: Vec::new(),
        })
    }
}

fn main() -> anyhow::Result<()> {
    if std::env::var(WORKER_SLOT_ENV).as_deref() == Ok(SILENT_SLOT) {
        std::thread::sleep(Duration::from_secs(30));
        return Ok(());
    }
    let registry = ToolchainRegistry::new().register(FixtureToolchain);
    lsperf_cli::run_worker_mode(&registry)
}
