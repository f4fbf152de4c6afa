//! Worker Process Entry Point
//!
//! Handles the worker side of the supervisor-worker architecture.
//!
//! On Unix, uses fd 3/4 for IPC (set via `LSPERF_IPC_FD`) and installs a
//! SIGTERM handler for graceful shutdown. On non-Unix, falls back to
//! stdin/stdout and skips signal handling.

use crate::measure::pin_to_cpu;
use crate::protocol::{MeasureError, MeasurementProtocol};
use crate::service::ToolchainRegistry;
use lsperf_ipc::{
    FailureKind, FrameError, FrameReader, FrameWriter, IPC_FD_ENV, WorkerCapabilities,
    WorkerMessage, WorkerRequest,
};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(unix)]
use std::os::unix::io::FromRawFd;

/// Environment variable carrying the pool slot index, used for CPU pinning
pub const WORKER_SLOT_ENV: &str = "LSPERF_WORKER_SLOT";

/// Global flag set by SIGTERM handler to request graceful shutdown.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Check if a graceful shutdown has been requested via SIGTERM.
pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::Relaxed)
}

/// Install a SIGTERM handler that sets the `SHUTDOWN_REQUESTED` flag.
/// The handler is async-signal-safe (only sets an atomic).
#[cfg(unix)]
fn install_sigterm_handler() {
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = sigterm_handler as *const () as usize;
        sa.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaction(libc::SIGTERM, &sa, std::ptr::null_mut());
    }
}

#[cfg(unix)]
extern "C" fn sigterm_handler(_sig: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::Relaxed);
}

#[cfg(not(unix))]
fn install_sigterm_handler() {}

/// IPC transport: either inherited fd pair or stdin/stdout fallback.
enum IpcTransport {
    #[cfg(unix)]
    Fds { read_fd: i32, write_fd: i32 },
    Stdio,
}

fn detect_transport() -> IpcTransport {
    #[cfg(unix)]
    if let Ok(val) = std::env::var(IPC_FD_ENV) {
        if let Some((r, w)) = val.split_once(',') {
            if let (Ok(read_fd), Ok(write_fd)) = (r.parse::<i32>(), w.parse::<i32>()) {
                return IpcTransport::Fds { read_fd, write_fd };
            }
        }
        tracing::warn!(
            value = %val,
            "invalid {IPC_FD_ENV} (expected <read_fd>,<write_fd>), falling back to stdio"
        );
    }
    IpcTransport::Stdio
}

/// Worker main loop
pub struct WorkerMain<R: Read = Box<dyn Read>, W: Write = Box<dyn Write>> {
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
}

impl WorkerMain {
    /// Create a new worker, using fd 3/4 if `LSPERF_IPC_FD` is set, otherwise stdin/stdout.
    pub fn new() -> Self {
        match detect_transport() {
            #[cfg(unix)]
            IpcTransport::Fds { read_fd, write_fd } => {
                let read_file = unsafe { std::fs::File::from_raw_fd(read_fd) };
                let write_file = unsafe { std::fs::File::from_raw_fd(write_fd) };
                Self::with_io(
                    Box::new(read_file) as Box<dyn Read>,
                    Box::new(write_file) as Box<dyn Write>,
                )
            }
            IpcTransport::Stdio => Self::with_io(
                Box::new(std::io::stdin()) as Box<dyn Read>,
                Box::new(std::io::stdout()) as Box<dyn Write>,
            ),
        }
    }
}

impl Default for WorkerMain {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Read, W: Write> WorkerMain<R, W> {
    /// Create a worker over explicit streams
    pub fn with_io(reader: R, writer: W) -> Self {
        Self {
            reader: FrameReader::new(reader),
            writer: FrameWriter::new(writer),
        }
    }

    /// Serve requests until `Shutdown`, end of stream, or SIGTERM.
    pub fn run(&mut self, registry: &ToolchainRegistry) -> Result<(), FrameError> {
        install_sigterm_handler();

        if let Some(slot) = std::env::var(WORKER_SLOT_ENV)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
        {
            let cpus = std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(1);
            if let Err(e) = pin_to_cpu(slot % cpus) {
                tracing::debug!(error = %e, "cpu pinning unavailable");
            }
        }

        self.writer
            .write(&WorkerMessage::Hello(WorkerCapabilities::default()))?;

        let mut protocol = MeasurementProtocol::new(registry);

        loop {
            if shutdown_requested() {
                break;
            }

            let request = match self.reader.read_request() {
                Ok(request) => request,
                Err(FrameError::EndOfStream) => break,
                Err(FrameError::Protocol(e)) => {
                    self.writer.write(&WorkerMessage::Failure {
                        kind: FailureKind::Protocol,
                        message: e.to_string(),
                    })?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let response = match request {
                WorkerRequest::Measure(input) => {
                    guarded(&mut protocol, |p| p.measure(&input).map(WorkerMessage::Measured))
                }
                WorkerRequest::BatchCompile(input) => guarded(&mut protocol, |p| {
                    p.batch_compile(&input).map(WorkerMessage::BatchCompiled)
                }),
                WorkerRequest::Shutdown => break,
            };

            self.writer.write(&response)?;
        }

        protocol.terminate();
        Ok(())
    }
}

/// Run one protocol step, turning errors and panics into `Failure` responses.
fn guarded(
    protocol: &mut MeasurementProtocol<'_>,
    step: impl FnOnce(&mut MeasurementProtocol<'_>) -> Result<WorkerMessage, MeasureError>,
) -> WorkerMessage {
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| step(protocol)));

    match outcome {
        Ok(Ok(message)) => message,
        Ok(Err(e)) => WorkerMessage::Failure {
            kind: FailureKind::Service,
            message: e.to_string(),
        },
        Err(panic) => {
            // The session may be half-updated; rebuild it on the next input
            protocol.reset();
            let message = if let Some(s) = panic.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic".to_string()
            };
            WorkerMessage::Failure {
                kind: FailureKind::Panic,
                message,
            }
        }
    }
}
