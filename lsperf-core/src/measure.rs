//! Request Timing
//!
//! Monotonic wall-clock timing for individual service requests, plus CPU
//! pinning so each worker stays on its own core.

use std::time::Instant;

/// Timer for one service request
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer
    #[inline(always)]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Elapsed time in fractional milliseconds
    #[inline(always)]
    pub fn stop_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1_000.0
    }
}

/// Time a fallible closure, returning its result and the elapsed milliseconds.
#[inline]
pub fn timed<T, E>(f: impl FnOnce() -> Result<T, E>) -> Result<(T, f64), E> {
    let timer = Timer::start();
    let value = f()?;
    Ok((value, timer.stop_ms()))
}

/// Set CPU affinity to pin the current thread to a specific core
///
/// Keeps a worker's timings from absorbing core migrations.
#[cfg(target_os = "linux")]
pub fn pin_to_cpu(cpu: usize) -> Result<(), std::io::Error> {
    use std::mem::MaybeUninit;

    unsafe {
        let mut set = MaybeUninit::<libc::cpu_set_t>::zeroed();
        let set_ref = set.assume_init_mut();

        libc::CPU_ZERO(set_ref);
        libc::CPU_SET(cpu, set_ref);

        let result = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), set_ref);

        if result == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub fn pin_to_cpu(_cpu: usize) -> Result<(), std::io::Error> {
    Ok(())
}
