//! Machine Fingerprint
//!
//! Identifies the machine a run was measured on, so that a stored baseline is
//! only compared against timings taken on the same kind of hardware.
//!
//! Linux-specific data (kernel release, CPU model, memory) degrades to
//! "unknown" or 0 on other platforms.

use lsperf_report::SystemFingerprint;

/// Fingerprint of the current machine
pub fn capture_fingerprint() -> SystemFingerprint {
    SystemFingerprint {
        os: std::env::consts::OS.to_string(),
        os_version: kernel_release().unwrap_or_else(|| "unknown".to_string()),
        arch: std::env::consts::ARCH.to_string(),
        cpu: cpu_model().unwrap_or_else(|| "unknown".to_string()),
        cpu_cores: num_cpus(),
        memory_gb: memory_gb().unwrap_or(0.0),
    }
}

fn kernel_release() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/proc/sys/kernel/osrelease")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

fn cpu_model() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/proc/cpuinfo")
            .ok()
            .and_then(|content| parse_cpu_model(&content))
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

fn num_cpus() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}

fn memory_gb() -> Option<f64> {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/proc/meminfo")
            .ok()
            .and_then(|content| parse_mem_total_gb(&content))
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

// x86 reports "model name"; many arm kernels only carry "CPU part"
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_cpu_model(cpuinfo: &str) -> Option<String> {
    let field = |name: &str| {
        cpuinfo
            .lines()
            .find(|l| l.starts_with(name))
            .and_then(|l| l.split(':').nth(1))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };
    field("model name").or_else(|| field("CPU part"))
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_mem_total_gb(meminfo: &str) -> Option<f64> {
    meminfo
        .lines()
        .find(|l| l.starts_with("MemTotal"))
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb as f64 / 1024.0 / 1024.0)
}
