//! IPC Message Types
//!
//! Requests are a tagged variant over the two kinds of work a worker accepts.
//! Every decoded message is validated before it reaches the caller.

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use thiserror::Error;

/// A message decoded correctly but carrying values the protocol does not allow.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    /// A required string field was empty
    #[error("empty field `{0}`")]
    EmptyField(&'static str),

    /// A duration was negative, NaN or infinite
    #[error("invalid duration for `{field}`: {value}")]
    InvalidDuration {
        /// Which duration field
        field: &'static str,
        /// Offending value
        value: f64,
    },

    /// Worker and supervisor disagree on the protocol version
    #[error("protocol version mismatch: expected {expected}, got {got}")]
    VersionMismatch {
        /// Version the supervisor speaks
        expected: u32,
        /// Version the worker advertised
        got: u32,
    },
}

/// Measure both tracked operations at one source position.
#[derive(Debug, Clone, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct PositionMeasurement {
    /// Source file, as reported by the toolchain's file list
    pub file: String,
    /// Character offset of the identifier within `file`
    pub offset: u32,
    /// Root directory of the package under test
    pub package_directory: String,
    /// Toolchain version selecting the compiler service
    pub toolchain_version: String,
}

/// Run one full batch compile of a package.
#[derive(Debug, Clone, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct BatchCompileMeasurement {
    /// Root directory of the package under test
    pub package_directory: String,
    /// Toolchain version selecting the compiler service
    pub toolchain_version: String,
}

/// Requests sent from supervisor to worker
#[derive(Debug, Clone, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum WorkerRequest {
    /// Time completions and quick-info at one position
    Measure(PositionMeasurement),
    /// Batch compile the package and report type/cache introspection
    BatchCompile(BatchCompileMeasurement),
    /// Stop the worker loop
    Shutdown,
}

impl WorkerRequest {
    /// Check field-level constraints that rkyv's byte validation cannot express.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            WorkerRequest::Measure(m) => {
                non_empty("file", &m.file)?;
                non_empty("package_directory", &m.package_directory)?;
                non_empty("toolchain_version", &m.toolchain_version)
            }
            WorkerRequest::BatchCompile(b) => {
                non_empty("package_directory", &b.package_directory)?;
                non_empty("toolchain_version", &b.toolchain_version)
            }
            WorkerRequest::Shutdown => Ok(()),
        }
    }
}

/// Timing result for one input, one trial. Durations are milliseconds.
#[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct SingleMeasurement {
    /// Source file of the measured position
    pub file: String,
    /// Offset of the measured position
    pub offset: u32,
    /// Wall-clock time of the completions request
    pub completions_duration_ms: f64,
    /// Wall-clock time of the quick-info request
    pub quick_info_duration_ms: f64,
}

impl SingleMeasurement {
    /// Check that both durations are usable samples.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        non_empty("file", &self.file)?;
        valid_duration("completions_duration_ms", self.completions_duration_ms)?;
        valid_duration("quick_info_duration_ms", self.quick_info_duration_ms)
    }
}

/// Sizes of the checker's internal relation caches after a batch compile.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize,
)]
#[archive(check_bytes)]
pub struct RelationCacheSizes {
    /// Assignability relation cache
    pub assignable: u64,
    /// Identity relation cache
    pub identity: u64,
    /// Subtype relation cache
    pub subtype: u64,
    /// Strict subtype relation cache
    pub strict_subtype: u64,
}

/// Outcome of a batch compile.
#[derive(Debug, Clone, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct BatchCompileResult {
    /// Number of types the checker created
    pub type_count: u64,
    /// Heap bytes in use after the compile
    pub memory_usage: u64,
    /// Relation cache sizes
    pub relation_cache_sizes: RelationCacheSizes,
    /// Module specifiers that failed to resolve
    pub unresolved_modules: Vec<String>,
}

/// Worker capabilities advertised during handshake
#[derive(Debug, Clone, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct WorkerCapabilities {
    /// Protocol version for compatibility
    pub protocol_version: u32,
    /// Process id of the worker
    pub pid: u32,
    /// Number of logical CPUs available
    pub cpu_count: u32,
}

impl Default for WorkerCapabilities {
    fn default() -> Self {
        Self {
            protocol_version: crate::PROTOCOL_VERSION,
            pid: std::process::id(),
            cpu_count: std::thread::available_parallelism()
                .map(|p| p.get() as u32)
                .unwrap_or(1),
        }
    }
}

/// Categories of request failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum FailureKind {
    /// The compiler service panicked (caught)
    Panic,
    /// The compiler service returned an error
    Service,
    /// The request was rejected at the protocol boundary
    Protocol,
}

/// Messages sent from worker to supervisor
#[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum WorkerMessage {
    /// Initial handshake with worker capabilities
    Hello(WorkerCapabilities),

    /// Result of a `Measure` request
    Measured(SingleMeasurement),

    /// Result of a `BatchCompile` request
    BatchCompiled(BatchCompileResult),

    /// The request could not be served; no sample was recorded
    Failure {
        /// Error category
        kind: FailureKind,
        /// Human-readable error message
        message: String,
    },
}

impl WorkerMessage {
    /// Validate the payload of a decoded message.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            WorkerMessage::Hello(caps) if caps.protocol_version != crate::PROTOCOL_VERSION => {
                Err(ProtocolError::VersionMismatch {
                    expected: crate::PROTOCOL_VERSION,
                    got: caps.protocol_version,
                })
            }
            WorkerMessage::Measured(m) => m.validate(),
            _ => Ok(()),
        }
    }
}

fn non_empty(field: &'static str, value: &str) -> Result<(), ProtocolError> {
    if value.is_empty() {
        Err(ProtocolError::EmptyField(field))
    } else {
        Ok(())
    }
}

fn valid_duration(field: &'static str, value: f64) -> Result<(), ProtocolError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ProtocolError::InvalidDuration { field, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn measure(file: &str, dir: &str) -> WorkerRequest {
        WorkerRequest::Measure(PositionMeasurement {
            file: file.to_string(),
            offset: 12,
            package_directory: dir.to_string(),
            toolchain_version: "5.4".to_string(),
        })
    }

    #[test]
    fn test_measure_request_validates() {
        assert!(measure("index.test.ts", "/pkgs/react").validate().is_ok());
        assert_eq!(
            measure("", "/pkgs/react").validate(),
            Err(ProtocolError::EmptyField("file"))
        );
        assert_eq!(
            measure("a.ts", "").validate(),
            Err(ProtocolError::EmptyField("package_directory"))
        );
    }

    #[test]
    fn test_batch_request_requires_toolchain() {
        let req = WorkerRequest::BatchCompile(BatchCompileMeasurement {
            package_directory: "/pkgs/react".to_string(),
            toolchain_version: String::new(),
        });
        assert_eq!(
            req.validate(),
            Err(ProtocolError::EmptyField("toolchain_version"))
        );
        assert!(WorkerRequest::Shutdown.validate().is_ok());
    }

    #[test]
    fn test_measurement_rejects_bad_durations() {
        let mut m = SingleMeasurement {
            file: "a.ts".to_string(),
            offset: 0,
            completions_duration_ms: 1.5,
            quick_info_duration_ms: 0.0,
        };
        assert!(m.validate().is_ok());

        m.quick_info_duration_ms = f64::NAN;
        assert!(matches!(
            m.validate(),
            Err(ProtocolError::InvalidDuration {
                field: "quick_info_duration_ms",
                ..
            })
        ));

        m.quick_info_duration_ms = -1.0;
        assert!(m.validate().is_err());
    }

    #[test]
    fn test_hello_version_check() {
        let ok = WorkerMessage::Hello(WorkerCapabilities::default());
        assert!(ok.validate().is_ok());

        let stale = WorkerMessage::Hello(WorkerCapabilities {
            protocol_version: crate::PROTOCOL_VERSION + 1,
            ..Default::default()
        });
        assert!(matches!(
            stale.validate(),
            Err(ProtocolError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_worker_capabilities_default() {
        let caps = WorkerCapabilities::default();
        assert_eq!(caps.protocol_version, crate::PROTOCOL_VERSION);
        assert_eq!(caps.pid, std::process::id());
        assert!(caps.cpu_count >= 1);
    }
}
