//! Compiler Service Seam
//!
//! The code-intelligence service is supplied by the embedding binary. A
//! [`ToolchainRegistry`] maps toolchain-version strings to implementations.

use lsperf_ipc::BatchCompileResult;
use std::path::Path;
use thiserror::Error;

/// Errors reported by a toolchain implementation
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("No toolchain registered for version {0}")]
    UnknownToolchain(String),

    #[error("Failed to load project at {path}: {message}")]
    Project { path: String, message: String },

    #[error("{operation} failed at {file}:{offset}: {message}")]
    Operation {
        operation: &'static str,
        file: String,
        offset: u32,
        message: String,
    },

    #[error("Batch compile failed: {0}")]
    Compile(String),
}

/// An identifier token as it appears in source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    pub text: String,
    pub offset: u32,
    pub line: u32,
    pub column: u32,
}

/// One file of a compiled package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: String,
    /// Declaration-only file (e.g. a `.d.ts`)
    pub is_declaration: bool,
    /// Part of the package's test sources
    pub is_test: bool,
    /// Identifier tokens in source order
    pub identifiers: Vec<Identifier>,
}

impl SourceFile {
    /// Whether positions in this file are worth measuring.
    pub fn is_measurable(&self) -> bool {
        self.is_test && !self.is_declaration
    }
}

/// A live code-intelligence session over one package.
///
/// Implementations only need to perform the request; the caller times it.
pub trait LanguageSession {
    /// Compute completions at a position
    fn completions_at(&mut self, file: &str, offset: u32) -> Result<(), ServiceError>;

    /// Compute quick-info at a position
    fn quick_info_at(&mut self, file: &str, offset: u32) -> Result<(), ServiceError>;
}

/// One version of the compiler/code-intelligence service.
pub trait Toolchain: Send + Sync {
    /// Version string this toolchain answers to
    fn version(&self) -> &str;

    /// Every file in the package's compilation, identifiers included
    fn project_files(&self, package_dir: &Path) -> Result<Vec<SourceFile>, ServiceError>;

    /// Build compile options, the file set and a session for the package
    fn open_session(&self, package_dir: &Path) -> Result<Box<dyn LanguageSession>, ServiceError>;

    /// Full batch compile with type and cache introspection
    fn batch_compile(&self, package_dir: &Path) -> Result<BatchCompileResult, ServiceError>;
}

/// Toolchains available to this binary, keyed by version.
#[derive(Default)]
pub struct ToolchainRegistry {
    toolchains: Vec<Box<dyn Toolchain>>,
}

impl ToolchainRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a toolchain; a later registration for the same version wins.
    pub fn register(mut self, toolchain: impl Toolchain + 'static) -> Self {
        let version = toolchain.version().to_string();
        self.toolchains.retain(|t| t.version() != version);
        self.toolchains.push(Box::new(toolchain));
        self
    }

    /// Look up a toolchain by version
    pub fn get(&self, version: &str) -> Result<&dyn Toolchain, ServiceError> {
        self.toolchains
            .iter()
            .find(|t| t.version() == version)
            .map(|t| t.as_ref())
            .ok_or_else(|| ServiceError::UnknownToolchain(version.to_string()))
    }

    /// Registered versions, in registration order
    pub fn versions(&self) -> impl Iterator<Item = &str> {
        self.toolchains.iter().map(|t| t.version())
    }
}

impl std::fmt::Debug for ToolchainRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.versions()).finish()
    }
}
