#![warn(missing_docs)]
//! lsperf IPC Protocol
//!
//! Binary protocol between the pool supervisor and its worker processes.
//! Uses rkyv with byte validation, plus typed field validation at decode time.

mod framing;
mod messages;

pub use framing::{FrameError, FrameReader, FrameWriter, MAX_FRAME_SIZE, read_frame, write_frame};
pub use messages::{
    BatchCompileMeasurement, BatchCompileResult, FailureKind, PositionMeasurement, ProtocolError,
    RelationCacheSizes, SingleMeasurement, WorkerCapabilities, WorkerMessage, WorkerRequest,
};

/// Protocol version for compatibility checking
pub const PROTOCOL_VERSION: u32 = 1;

/// Environment variable carrying the inherited `<read_fd>,<write_fd>` pair
pub const IPC_FD_ENV: &str = "LSPERF_IPC_FD";

/// Command-line flag that switches a binary into worker mode
pub const WORKER_FLAG: &str = "--lsperf-worker";
