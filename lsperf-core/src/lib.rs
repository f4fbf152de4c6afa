#![warn(missing_docs)]
//! lsperf Core - Worker Runtime
//!
//! This crate provides the measuring side of lsperf:
//! - the identifier sampler that picks which positions get measured
//! - the toolchain traits the embedding binary implements
//! - the per-process measurement protocol (session reuse, warm-up, timing)
//! - the worker main loop speaking the IPC protocol

mod measure;
mod protocol;
mod sampler;
mod service;
mod worker;

pub use measure::{Timer, pin_to_cpu, timed};
pub use protocol::{MeasureError, MeasurementProtocol, ProtocolPhase};
pub use sampler::{
    END_BAND_PERCENT, START_BAND_PERCENT, SamplePlan, SamplePosition,
    measurable_identifier_count, sample_identifiers, sample_package_positions,
};
pub use service::{
    Identifier, LanguageSession, ServiceError, SourceFile, Toolchain, ToolchainRegistry,
};
pub use worker::{WORKER_SLOT_ENV, WorkerMain, shutdown_requested};
