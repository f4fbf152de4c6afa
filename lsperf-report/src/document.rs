//! Document Store
//!
//! Historical summaries keyed by package, package version and toolchain
//! version. Each stored document carries the fingerprint of the machine that
//! produced it; comparisons only trust documents from a compatible machine.

use crate::benchmark::PackageBenchmarkSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

/// Document schema version
pub const DOCUMENT_SCHEMA_VERSION: u32 = 1;

/// Errors from reading or writing stored documents
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed document file {}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Hardware and OS identity of the measuring machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemFingerprint {
    pub os: String,
    pub os_version: String,
    pub arch: String,
    pub cpu: String,
    pub cpu_cores: u32,
    pub memory_gb: f64,
}

impl SystemFingerprint {
    /// Timings are only comparable when taken on the same kind of machine.
    ///
    /// OS version and installed memory are informational and do not count.
    pub fn is_compatible_with(&self, other: &SystemFingerprint) -> bool {
        self.os == other.os
            && self.arch == other.arch
            && self.cpu == other.cpu
            && self.cpu_cores == other.cpu_cores
    }
}

/// Metadata stored alongside each summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub schema_version: u32,
    pub timestamp: DateTime<Utc>,
    pub system: SystemFingerprint,
    pub lsperf_version: String,
}

/// A persisted summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkDocument {
    pub meta: DocumentMeta,
    pub summary: PackageBenchmarkSummary,
}

impl BenchmarkDocument {
    /// Wrap a fresh summary, stamped now
    pub fn new(summary: PackageBenchmarkSummary, system: SystemFingerprint) -> Self {
        Self {
            meta: DocumentMeta {
                schema_version: DOCUMENT_SCHEMA_VERSION,
                timestamp: Utc::now(),
                system,
                lsperf_version: env!("CARGO_PKG_VERSION").to_string(),
            },
            summary,
        }
    }

    /// Lookup key of this document
    pub fn key(&self) -> DocumentKey {
        DocumentKey {
            package_name: self.summary.run.package_name.clone(),
            package_version: self.summary.run.package_version.clone(),
            toolchain_version: self.summary.run.toolchain_version.clone(),
        }
    }
}

/// Identifies one history of documents
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentKey {
    pub package_name: String,
    pub package_version: String,
    pub toolchain_version: String,
}

impl DocumentKey {
    /// Key for one package version under one toolchain
    pub fn new(
        package_name: impl Into<String>,
        package_version: impl Into<String>,
        toolchain_version: impl Into<String>,
    ) -> Self {
        Self {
            package_name: package_name.into(),
            package_version: package_version.into(),
            toolchain_version: toolchain_version.into(),
        }
    }

    /// File-system safe name; scoped names like `@scope/pkg` become `scope__pkg`
    fn file_name(&self) -> String {
        let sanitize = |s: &str| {
            s.trim_start_matches('@')
                .chars()
                .map(|c| match c {
                    'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c.to_string(),
                    _ => "__".to_string(),
                })
                .collect::<String>()
        };
        format!(
            "{}@{}+{}.json",
            sanitize(&self.package_name),
            sanitize(&self.package_version),
            sanitize(&self.toolchain_version)
        )
    }
}

impl std::fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}@{} ({})",
            self.package_name, self.package_version, self.toolchain_version
        )
    }
}

/// Persistent store of benchmark documents
pub trait DocumentStore {
    /// Most recent document for the key, if any
    fn get_latest(&self, key: &DocumentKey) -> Result<Option<BenchmarkDocument>, StoreError>;

    /// Append a document to its history
    fn insert(&mut self, document: &BenchmarkDocument) -> Result<(), StoreError>;
}

/// One JSON file per key, holding the append-only history as an array
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    /// Store rooted at `root`; the directory is created on first insert
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &DocumentKey) -> PathBuf {
        self.root.join(key.file_name())
    }

    /// Full history for a key, oldest first
    pub fn history(&self, key: &DocumentKey) -> Result<Vec<BenchmarkDocument>, StoreError> {
        let path = self.path_for(key);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        serde_json::from_str(&content).map_err(|source| StoreError::Malformed { path, source })
    }
}

impl DocumentStore for JsonFileStore {
    fn get_latest(&self, key: &DocumentKey) -> Result<Option<BenchmarkDocument>, StoreError> {
        Ok(self
            .history(key)?
            .into_iter()
            .max_by_key(|d| d.meta.timestamp))
    }

    fn insert(&mut self, document: &BenchmarkDocument) -> Result<(), StoreError> {
        let key = document.key();
        let mut history = self.history(&key)?;
        history.push(document.clone());

        fs::create_dir_all(&self.root).map_err(|source| StoreError::Io {
            path: self.root.clone(),
            source,
        })?;

        // Write then rename so a crash never leaves a truncated history
        let path = self.path_for(&key);
        let staging = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(&history)?;
        fs::write(&staging, json).map_err(|source| StoreError::Io {
            path: staging.clone(),
            source,
        })?;
        fs::rename(&staging, &path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;

        tracing::debug!(key = %key, entries = history.len(), "document stored");
        Ok(())
    }
}
