//! Worker Pool Supervisor
//!
//! Feeds measurement inputs to a fixed number of worker processes and routes
//! their results into a [`PositionArena`].
//!
//! A single dispatch loop owns the queue and the arena. Each worker has a
//! reader thread that only forwards decoded frames (or its own death) into a
//! shared channel, tagged with the worker's slot and generation. Replacing a
//! worker bumps the generation. A late measurement from a killed worker still
//! lands in the arena by `(file, offset)`, but its input stays counted as
//! failed; every other stale event is ignored.
//!
//! A worker that cannot be started costs the input it was meant to run. After
//! [`MAX_CONSECUTIVE_SPAWN_FAILURES`] failed starts in a row the remaining
//! inputs are abandoned.

use crate::arena::PositionArena;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use lsperf_core::WORKER_SLOT_ENV;
use lsperf_ipc::{
    FrameError, FrameReader, FrameWriter, IPC_FD_ENV, PROTOCOL_VERSION, PositionMeasurement,
    WORKER_FLAG, WorkerMessage, WorkerRequest,
};
use std::collections::VecDeque;
use std::os::unix::io::{FromRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

/// How long a signalled worker gets before SIGKILL
const KILL_GRACE: Duration = Duration::from_millis(500);

/// Upper bound on one wait of the dispatch loop
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default wait for a new worker's `Hello`
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Failed worker starts in a row before the pool gives up on its queue
pub const MAX_CONSECUTIVE_SPAWN_FAILURES: usize = 3;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(#[from] std::io::Error),

    #[error("IPC error: {0}")]
    IpcError(String),

    #[error("Worker crashed on {input}: {reason}")]
    WorkerCrashed { input: String, reason: String },

    #[error("Timeout waiting for worker")]
    Timeout,

    #[error("Worker protocol error: expected {expected}, got {got}")]
    ProtocolError { expected: String, got: String },
}

impl From<FrameError> for SupervisorError {
    fn from(e: FrameError) -> Self {
        SupervisorError::IpcError(e.to_string())
    }
}

/// Something a worker's reader observed
#[derive(Debug)]
pub enum WorkerEvent {
    /// A decoded, validated response
    Message(WorkerMessage),
    /// A frame that decoded but failed validation
    Invalid(String),
    /// The worker's output closed; it is gone
    Exited(String),
}

/// Event tagged with the worker it came from
#[derive(Debug)]
pub struct PoolEvent {
    pub slot: usize,
    pub generation: u64,
    pub event: WorkerEvent,
}

/// The supervisor's handle on one worker
pub trait PoolWorker: Send {
    /// Send one request; responses arrive on the pool channel
    fn send(&mut self, request: &WorkerRequest) -> Result<(), SupervisorError>;

    /// Stop the worker now (SIGTERM, grace period, SIGKILL)
    fn kill(&mut self);

    /// Ask the worker to exit after its current request
    fn shutdown(self: Box<Self>);
}

/// Creates workers for pool slots
pub trait WorkerSpawner {
    /// Start a worker whose events go to `events`, tagged with `slot`/`generation`
    fn spawn(
        &mut self,
        slot: usize,
        generation: u64,
        events: Sender<PoolEvent>,
    ) -> Result<Box<dyn PoolWorker>, SupervisorError>;
}

/// Create a pipe pair, returning (read_fd, write_fd).
fn create_pipe() -> Result<(RawFd, RawFd), std::io::Error> {
    let mut fds = [0 as RawFd; 2];
    let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    // Close-on-exec by default; the child clears it on the two ends it keeps
    for &fd in &fds {
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFD);
            libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC);
        }
    }
    Ok((fds[0], fds[1]))
}

fn close_fd(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

/// Send SIGTERM to a process. Returns `Err` if the signal could not be delivered.
fn send_sigterm(pid: u32) -> Result<(), std::io::Error> {
    let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if ret == -1 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// A worker running as a child process, talking over fd 3/4
pub struct ProcessWorker {
    child: Child,
    writer: FrameWriter<std::fs::File>,
    reader_thread: Option<JoinHandle<()>>,
}

impl ProcessWorker {
    /// Spawn `binary` in worker mode and wait up to `handshake_timeout` for its `Hello`.
    pub fn spawn(
        binary: &Path,
        slot: usize,
        generation: u64,
        events: Sender<PoolEvent>,
        handshake_timeout: Duration,
    ) -> Result<Self, SupervisorError> {
        // cmd pipe: supervisor writes requests, worker reads fd 3
        let (cmd_read, cmd_write) = create_pipe()?;
        // msg pipe: worker writes fd 4, supervisor reads
        let (msg_read, msg_write) = match create_pipe() {
            Ok(fds) => fds,
            Err(e) => {
                close_fd(cmd_read);
                close_fd(cmd_write);
                return Err(SupervisorError::SpawnFailed(e));
            }
        };

        let mut command = Command::new(binary);
        command
            .arg(WORKER_FLAG)
            .env(IPC_FD_ENV, "3,4")
            .env(WORKER_SLOT_ENV, slot.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());

        unsafe {
            command.pre_exec(move || {
                if cmd_read != 3 {
                    libc::dup2(cmd_read, 3);
                    libc::close(cmd_read);
                }
                let flags = libc::fcntl(3, libc::F_GETFD);
                libc::fcntl(3, libc::F_SETFD, flags & !libc::FD_CLOEXEC);

                if msg_write != 4 {
                    libc::dup2(msg_write, 4);
                    libc::close(msg_write);
                }
                let flags = libc::fcntl(4, libc::F_GETFD);
                libc::fcntl(4, libc::F_SETFD, flags & !libc::FD_CLOEXEC);

                libc::close(cmd_write);
                libc::close(msg_read);

                Ok(())
            });
        }

        let child = match command.spawn() {
            Ok(c) => c,
            Err(e) => {
                close_fd(cmd_read);
                close_fd(cmd_write);
                close_fd(msg_read);
                close_fd(msg_write);
                return Err(SupervisorError::SpawnFailed(e));
            }
        };

        close_fd(cmd_read);
        close_fd(msg_write);

        let writer = FrameWriter::new(unsafe { std::fs::File::from_raw_fd(cmd_write) });
        let mut reader = FrameReader::new(unsafe { std::fs::File::from_raw_fd(msg_read) });

        let mut worker = Self {
            child,
            writer,
            reader_thread: None,
        };

        // The reader thread takes the handshake too, so a silent worker cannot block us
        let (hello_tx, hello_rx) = crossbeam_channel::bounded(1);
        let thread = std::thread::Builder::new()
            .name(format!("lsperf-worker-{slot}"))
            .spawn(move || {
                let hello = reader.read_message();
                let ready = matches!(
                    &hello,
                    Ok(WorkerMessage::Hello(caps)) if caps.protocol_version == PROTOCOL_VERSION
                );
                if hello_tx.send(hello).is_ok() && ready {
                    forward_events(reader, slot, generation, events);
                }
            })?;
        worker.reader_thread = Some(thread);

        let failure = match hello_rx.recv_timeout(handshake_timeout) {
            Ok(Ok(WorkerMessage::Hello(caps))) if caps.protocol_version == PROTOCOL_VERSION => {
                tracing::debug!(slot, pid = caps.pid, "worker ready");
                return Ok(worker);
            }
            Ok(Ok(WorkerMessage::Hello(caps))) => SupervisorError::ProtocolError {
                expected: format!("protocol version {}", PROTOCOL_VERSION),
                got: format!("protocol version {}", caps.protocol_version),
            },
            Ok(Ok(other)) => SupervisorError::ProtocolError {
                expected: "Hello".to_string(),
                got: format!("{:?}", other),
            },
            Ok(Err(FrameError::EndOfStream)) => SupervisorError::ProtocolError {
                expected: "Hello".to_string(),
                got: "worker exited before handshake".to_string(),
            },
            Ok(Err(e)) => e.into(),
            Err(_) => SupervisorError::Timeout,
        };
        worker.kill();
        Err(failure)
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn wait_with_grace(&mut self) {
        let deadline = Instant::now() + KILL_GRACE;
        while self.is_alive() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        if self.is_alive() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }

    fn join_reader(&mut self) {
        if let Some(thread) = self.reader_thread.take() {
            let _ = thread.join();
        }
    }
}

/// Reader loop: decode frames until the pipe closes.
fn forward_events(
    mut reader: FrameReader<std::fs::File>,
    slot: usize,
    generation: u64,
    events: Sender<PoolEvent>,
) {
    let tag = |event| PoolEvent {
        slot,
        generation,
        event,
    };
    loop {
        let event = match reader.read_message() {
            Ok(message) => WorkerEvent::Message(message),
            Err(FrameError::Protocol(e)) => WorkerEvent::Invalid(e.to_string()),
            Err(FrameError::EndOfStream) => {
                let _ = events.send(tag(WorkerEvent::Exited("worker closed its pipe".into())));
                return;
            }
            Err(e) => {
                let _ = events.send(tag(WorkerEvent::Exited(e.to_string())));
                return;
            }
        };
        if events.send(tag(event)).is_err() {
            return;
        }
    }
}

impl PoolWorker for ProcessWorker {
    fn send(&mut self, request: &WorkerRequest) -> Result<(), SupervisorError> {
        self.writer.write(request)?;
        Ok(())
    }

    fn kill(&mut self) {
        if self.is_alive() {
            let _ = send_sigterm(self.child.id());
            self.wait_with_grace();
        }
        self.join_reader();
    }

    fn shutdown(mut self: Box<Self>) {
        let _ = self.writer.write(&WorkerRequest::Shutdown);
        self.wait_with_grace();
        self.join_reader();
    }
}

impl Drop for ProcessWorker {
    fn drop(&mut self) {
        if self.is_alive() {
            let _ = send_sigterm(self.child.id());
            std::thread::sleep(Duration::from_millis(50));
            if self.is_alive() {
                let _ = self.child.kill();
            }
            let _ = self.child.wait();
        }
    }
}

/// Spawns the current executable (or a given binary) in worker mode
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    binary: PathBuf,
    handshake_timeout: Duration,
}

impl ProcessSpawner {
    /// Workers re-execute this binary
    pub fn current_exe() -> Result<Self, SupervisorError> {
        Ok(Self::with_binary(std::env::current_exe()?))
    }

    /// Workers run `binary`
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// How long a new worker may take to say `Hello`
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

impl WorkerSpawner for ProcessSpawner {
    fn spawn(
        &mut self,
        slot: usize,
        generation: u64,
        events: Sender<PoolEvent>,
    ) -> Result<Box<dyn PoolWorker>, SupervisorError> {
        Ok(Box::new(ProcessWorker::spawn(
            &self.binary,
            slot,
            generation,
            events,
            self.handshake_timeout,
        )?))
    }
}

/// Pool limits
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Concurrent workers
    pub jobs: usize,
    /// Budget for a single request before the worker is killed
    pub call_timeout: Duration,
    /// Soft deadline for the whole run
    pub max_run_time: Option<Duration>,
    /// Replace failed workers and continue instead of aborting
    pub crash_recovery: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            jobs: std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(1),
            call_timeout: Duration::from_secs(60),
            max_run_time: None,
            crash_recovery: true,
        }
    }
}

/// What happened during a pool run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolOutcome {
    /// Inputs that produced a measurement
    pub completed: usize,
    /// Inputs lost to a crash, failure or call timeout
    pub failed: usize,
    /// Inputs never dispatched because the soft deadline passed
    pub skipped: usize,
    /// Measurements whose key was not in the arena
    pub dropped: usize,
    /// Measurements recorded after their input was already counted as failed
    pub late: usize,
    /// Workers started, replacements included
    pub workers_spawned: usize,
    /// Any input failed
    pub crashed: bool,
    /// The soft deadline cut the run short
    pub timed_out: bool,
}

struct Slot {
    worker: Option<Box<dyn PoolWorker>>,
    generation: u64,
    in_flight: Option<(PositionMeasurement, Instant)>,
}

fn describe(input: &PositionMeasurement) -> String {
    format!(
        "{}:{} ({})",
        input.file, input.offset, input.package_directory
    )
}

/// Fixed-size pool driving measurement inputs to completion
pub struct WorkerPool<S: WorkerSpawner> {
    spawner: S,
    config: PoolConfig,
    spawn_failures: usize,
}

impl<S: WorkerSpawner> WorkerPool<S> {
    pub fn new(spawner: S, config: PoolConfig) -> Self {
        Self {
            spawner,
            config,
            spawn_failures: 0,
        }
    }

    /// Pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Spawner, for one-shot requests outside the pool
    pub fn spawner_mut(&mut self) -> &mut S {
        &mut self.spawner
    }

    /// Measure every input, in the given order, into `arena`.
    ///
    /// `progress(done, total)` is called after each input settles.
    pub fn run(
        &mut self,
        inputs: Vec<PositionMeasurement>,
        arena: &mut PositionArena,
        mut progress: impl FnMut(usize, usize),
    ) -> Result<PoolOutcome, SupervisorError> {
        let total = inputs.len();
        let mut outcome = PoolOutcome::default();
        if total == 0 {
            return Ok(outcome);
        }

        let (tx, rx) = crossbeam_channel::unbounded();
        let mut queue: VecDeque<PositionMeasurement> = inputs.into();
        let mut slots: Vec<Slot> = (0..self.config.jobs.clamp(1, total))
            .map(|_| Slot {
                worker: None,
                generation: 0,
                in_flight: None,
            })
            .collect();

        self.spawn_failures = 0;
        let started = Instant::now();
        let result = self.dispatch_loop(
            &mut slots,
            &mut queue,
            &tx,
            &rx,
            arena,
            &mut outcome,
            started,
            &mut |done| progress(done, total),
        );

        for slot in &mut slots {
            if let Some(worker) = slot.worker.take() {
                worker.shutdown();
            }
        }
        result?;

        outcome.skipped = queue.len();
        if outcome.timed_out {
            tracing::info!(
                completed = outcome.completed,
                failed = outcome.failed,
                skipped = outcome.skipped,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "soft deadline reached, remaining inputs skipped"
            );
        }
        Ok(outcome)
    }

    #[allow(clippy::too_many_arguments)]
    fn dispatch_loop(
        &mut self,
        slots: &mut [Slot],
        queue: &mut VecDeque<PositionMeasurement>,
        tx: &Sender<PoolEvent>,
        rx: &Receiver<PoolEvent>,
        arena: &mut PositionArena,
        outcome: &mut PoolOutcome,
        started: Instant,
        progress: &mut dyn FnMut(usize),
    ) -> Result<(), SupervisorError> {
        loop {
            // Soft deadline, checked between dispatches only
            if !outcome.timed_out
                && !queue.is_empty()
                && self
                    .config
                    .max_run_time
                    .is_some_and(|limit| started.elapsed() >= limit)
            {
                outcome.timed_out = true;
            }

            if !outcome.timed_out {
                self.fill_idle_slots(slots, queue, tx, outcome, progress)?;
            }

            if slots.iter().all(|s| s.in_flight.is_none()) {
                if queue.is_empty() || outcome.timed_out {
                    return Ok(());
                }
                continue;
            }

            let wait = slots
                .iter()
                .filter_map(|s| s.in_flight.as_ref())
                .map(|(_, sent)| self.config.call_timeout.saturating_sub(sent.elapsed()))
                .min()
                .unwrap_or(POLL_INTERVAL)
                .min(POLL_INTERVAL);

            match rx.recv_timeout(wait) {
                Ok(event) => self.handle_event(event, slots, arena, outcome, progress)?,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(SupervisorError::IpcError("event channel closed".to_string()));
                }
            }

            for slot in slots.iter_mut() {
                let overrun = slot
                    .in_flight
                    .as_ref()
                    .is_some_and(|(_, sent)| sent.elapsed() >= self.config.call_timeout);
                if overrun {
                    self.fail_in_flight(slot, "call timeout exceeded", true, outcome, progress)?;
                }
            }
        }
    }

    fn fill_idle_slots(
        &mut self,
        slots: &mut [Slot],
        queue: &mut VecDeque<PositionMeasurement>,
        tx: &Sender<PoolEvent>,
        outcome: &mut PoolOutcome,
        progress: &mut dyn FnMut(usize),
    ) -> Result<(), SupervisorError> {
        for (index, slot) in slots.iter_mut().enumerate() {
            if slot.in_flight.is_some() {
                continue;
            }
            let Some(input) = queue.pop_front() else {
                break;
            };

            if slot.worker.is_none() {
                slot.generation += 1;
                match self.spawner.spawn(index, slot.generation, tx.clone()) {
                    Ok(worker) => {
                        self.spawn_failures = 0;
                        outcome.workers_spawned += 1;
                        slot.worker = Some(worker);
                    }
                    Err(e) => {
                        self.spawn_failures += 1;
                        let reason = format!("worker failed to start: {e}");
                        self.record_failure(&input, &reason, outcome, progress)?;
                        if self.spawn_failures >= MAX_CONSECUTIVE_SPAWN_FAILURES {
                            let abandoned = queue.len();
                            tracing::error!(
                                failures = self.spawn_failures,
                                abandoned,
                                "workers keep failing to start, abandoning remaining inputs"
                            );
                            queue.clear();
                            outcome.failed += abandoned;
                            progress(outcome.completed + outcome.failed);
                            break;
                        }
                        continue;
                    }
                }
            }

            let sent = match slot.worker.as_mut() {
                Some(worker) => worker.send(&WorkerRequest::Measure(input.clone())),
                None => Err(SupervisorError::IpcError("worker missing".to_string())),
            };
            slot.in_flight = Some((input, Instant::now()));
            if let Err(e) = sent {
                self.fail_in_flight(slot, &e.to_string(), true, outcome, progress)?;
            }
        }
        Ok(())
    }

    fn handle_event(
        &mut self,
        event: PoolEvent,
        slots: &mut [Slot],
        arena: &mut PositionArena,
        outcome: &mut PoolOutcome,
        progress: &mut dyn FnMut(usize),
    ) -> Result<(), SupervisorError> {
        let Some(slot) = slots.get_mut(event.slot) else {
            return Ok(());
        };
        if event.generation != slot.generation || slot.worker.is_none() {
            if let WorkerEvent::Message(WorkerMessage::Measured(measurement)) = event.event {
                if arena.record(&measurement) {
                    outcome.late += 1;
                    tracing::debug!(
                        file = %measurement.file,
                        offset = measurement.offset,
                        "late measurement from a replaced worker recorded"
                    );
                }
            }
            return Ok(());
        }

        match event.event {
            WorkerEvent::Message(WorkerMessage::Measured(measurement)) => {
                if slot.in_flight.take().is_none() {
                    tracing::warn!(file = %measurement.file, "unsolicited measurement ignored");
                    return Ok(());
                }
                if !arena.record(&measurement) {
                    outcome.dropped += 1;
                    tracing::warn!(
                        file = %measurement.file,
                        offset = measurement.offset,
                        "measurement for unknown position dropped"
                    );
                }
                outcome.completed += 1;
                progress(outcome.completed + outcome.failed);
                Ok(())
            }
            WorkerEvent::Message(WorkerMessage::Failure { kind, message }) => {
                let reason = format!("{kind:?}: {message}");
                self.fail_in_flight(slot, &reason, false, outcome, progress)
            }
            WorkerEvent::Message(other) => {
                let reason = format!("unexpected response {other:?}");
                self.fail_in_flight(slot, &reason, true, outcome, progress)
            }
            WorkerEvent::Invalid(reason) => {
                self.fail_in_flight(slot, &reason, true, outcome, progress)
            }
            WorkerEvent::Exited(reason) => {
                slot.worker = None;
                if slot.in_flight.is_some() {
                    self.fail_in_flight(slot, &reason, false, outcome, progress)
                } else {
                    tracing::debug!(slot = event.slot, %reason, "idle worker exited");
                    Ok(())
                }
            }
        }
    }

    /// Record the slot's in-flight input as lost, optionally killing its worker.
    fn fail_in_flight(
        &mut self,
        slot: &mut Slot,
        reason: &str,
        kill: bool,
        outcome: &mut PoolOutcome,
        progress: &mut dyn FnMut(usize),
    ) -> Result<(), SupervisorError> {
        let Some((input, _)) = slot.in_flight.take() else {
            return Ok(());
        };

        if kill {
            if let Some(mut worker) = slot.worker.take() {
                worker.kill();
            }
        }
        self.record_failure(&input, reason, outcome, progress)
    }

    /// Count `input` as lost; an error when crashes are not tolerated.
    fn record_failure(
        &self,
        input: &PositionMeasurement,
        reason: &str,
        outcome: &mut PoolOutcome,
        progress: &mut dyn FnMut(usize),
    ) -> Result<(), SupervisorError> {
        outcome.failed += 1;
        outcome.crashed = true;
        tracing::warn!(
            input = %describe(input),
            toolchain = %input.toolchain_version,
            %reason,
            "measurement failed"
        );

        if !self.config.crash_recovery {
            return Err(SupervisorError::WorkerCrashed {
                input: describe(input),
                reason: reason.to_string(),
            });
        }

        progress(outcome.completed + outcome.failed);
        Ok(())
    }
}

/// Run one request on a dedicated worker that is discarded afterwards.
pub fn run_one_shot(
    spawner: &mut dyn WorkerSpawner,
    request: &WorkerRequest,
    timeout: Duration,
) -> Result<WorkerMessage, SupervisorError> {
    let (tx, rx) = crossbeam_channel::unbounded();
    let mut worker = spawner.spawn(0, 1, tx)?;
    worker.send(request)?;

    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let event = match rx.recv_timeout(remaining) {
            Ok(event) => event.event,
            Err(_) => {
                worker.kill();
                return Err(SupervisorError::Timeout);
            }
        };
        match event {
            WorkerEvent::Message(message) => {
                worker.shutdown();
                return Ok(message);
            }
            WorkerEvent::Invalid(reason) => {
                worker.kill();
                return Err(SupervisorError::ProtocolError {
                    expected: "valid response".to_string(),
                    got: reason,
                });
            }
            WorkerEvent::Exited(reason) => {
                worker.kill();
                return Err(SupervisorError::WorkerCrashed {
                    input: format!("{request:?}"),
                    reason,
                });
            }
        }
    }
}
