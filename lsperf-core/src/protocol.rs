//! Measurement Protocol
//!
//! Per-process state machine: `Uninitialized -> Ready -> (Measuring)* -> Terminated`.
//!
//! The first input for a package opens a session and performs one untimed
//! warm-up of both operations, so first-call initialization is never charged
//! to a real sample. Later inputs for the same package reuse the session.

use crate::measure::timed;
use crate::service::{LanguageSession, ServiceError, ToolchainRegistry};
use lsperf_ipc::{
    BatchCompileMeasurement, BatchCompileResult, PositionMeasurement, SingleMeasurement,
};
use std::path::Path;
use thiserror::Error;

/// Errors from a single protocol step
#[derive(Debug, Error)]
pub enum MeasureError {
    #[error("Measurement protocol already terminated")]
    Terminated,

    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Observable protocol phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolPhase {
    Uninitialized,
    Ready,
    Terminated,
}

struct ActiveSession {
    package_directory: String,
    toolchain_version: String,
    session: Box<dyn LanguageSession>,
}

impl ActiveSession {
    fn serves(&self, input: &PositionMeasurement) -> bool {
        self.package_directory == input.package_directory
            && self.toolchain_version == input.toolchain_version
    }
}

enum ProtocolState {
    Uninitialized,
    Ready(ActiveSession),
    Terminated,
}

/// One protocol instance per worker process.
pub struct MeasurementProtocol<'r> {
    registry: &'r ToolchainRegistry,
    state: ProtocolState,
    sessions_opened: usize,
}

impl<'r> MeasurementProtocol<'r> {
    /// Create an uninitialized protocol over the given toolchains
    pub fn new(registry: &'r ToolchainRegistry) -> Self {
        Self {
            registry,
            state: ProtocolState::Uninitialized,
            sessions_opened: 0,
        }
    }

    /// Current phase
    pub fn phase(&self) -> ProtocolPhase {
        match self.state {
            ProtocolState::Uninitialized => ProtocolPhase::Uninitialized,
            ProtocolState::Ready(_) => ProtocolPhase::Ready,
            ProtocolState::Terminated => ProtocolPhase::Terminated,
        }
    }

    /// How many sessions this process has built (warm-ups performed)
    pub fn sessions_opened(&self) -> usize {
        self.sessions_opened
    }

    /// Time completions and quick-info at one position.
    ///
    /// On error the protocol drops back to `Uninitialized`, so the next input
    /// builds a fresh session instead of reusing one in an unknown state.
    pub fn measure(
        &mut self,
        input: &PositionMeasurement,
    ) -> Result<SingleMeasurement, MeasureError> {
        let result = self.measure_inner(input);
        if result.is_err() && !matches!(self.state, ProtocolState::Terminated) {
            self.reset();
        }
        result
    }

    fn measure_inner(
        &mut self,
        input: &PositionMeasurement,
    ) -> Result<SingleMeasurement, MeasureError> {
        let active = self.ensure_session(input)?;
        let session = active.session.as_mut();

        let ((), completions_duration_ms) =
            timed(|| session.completions_at(&input.file, input.offset))?;
        let ((), quick_info_duration_ms) =
            timed(|| session.quick_info_at(&input.file, input.offset))?;

        Ok(SingleMeasurement {
            file: input.file.clone(),
            offset: input.offset,
            completions_duration_ms,
            quick_info_duration_ms,
        })
    }

    fn ensure_session(
        &mut self,
        input: &PositionMeasurement,
    ) -> Result<&mut ActiveSession, MeasureError> {
        let needs_session = match &self.state {
            ProtocolState::Terminated => return Err(MeasureError::Terminated),
            ProtocolState::Ready(active) => !active.serves(input),
            ProtocolState::Uninitialized => true,
        };

        if needs_session {
            let toolchain = self.registry.get(&input.toolchain_version)?;
            let mut session = toolchain.open_session(Path::new(&input.package_directory))?;
            self.sessions_opened += 1;
            tracing::debug!(
                package = %input.package_directory,
                toolchain = %input.toolchain_version,
                "session opened, warming up"
            );

            session.completions_at(&input.file, input.offset)?;
            session.quick_info_at(&input.file, input.offset)?;

            self.state = ProtocolState::Ready(ActiveSession {
                package_directory: input.package_directory.clone(),
                toolchain_version: input.toolchain_version.clone(),
                session,
            });
        }

        match &mut self.state {
            ProtocolState::Ready(active) => Ok(active),
            _ => Err(MeasureError::Terminated),
        }
    }

    /// Run a batch compile. Stateless: it never touches the measuring session.
    pub fn batch_compile(
        &self,
        input: &BatchCompileMeasurement,
    ) -> Result<BatchCompileResult, MeasureError> {
        if matches!(self.state, ProtocolState::Terminated) {
            return Err(MeasureError::Terminated);
        }
        let toolchain = self.registry.get(&input.toolchain_version)?;
        Ok(toolchain.batch_compile(Path::new(&input.package_directory))?)
    }

    /// Forget the current session
    pub fn reset(&mut self) {
        if !matches!(self.state, ProtocolState::Terminated) {
            self.state = ProtocolState::Uninitialized;
        }
    }

    /// Release the session; every later request is rejected.
    pub fn terminate(&mut self) {
        self.state = ProtocolState::Terminated;
    }
}
