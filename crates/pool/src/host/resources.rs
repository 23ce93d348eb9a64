//! Static host resources used for capacity sizing

use serde::{Deserialize, Serialize};
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};
use tracing::debug;

/// Used when the platform does not expose `RLIMIT_NOFILE`.
const FALLBACK_FD_LIMIT: u64 = 1024;

/// Snapshot of the host's sizing-relevant resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostResources {
    /// Total physical RAM in MiB
    pub total_ram_mb: u64,
    /// Logical CPU count
    pub cpu_cores: usize,
    /// Soft limit on open file descriptors
    pub fd_limit: u64,
}

impl HostResources {
    /// Create a snapshot from explicit values
    pub fn new(total_ram_mb: u64, cpu_cores: usize, fd_limit: u64) -> Self {
        Self {
            total_ram_mb,
            cpu_cores,
            fd_limit,
        }
    }

    /// Probe the current host
    pub fn probe() -> Self {
        let system = System::new_with_specifics(
            RefreshKind::new()
                .with_memory(MemoryRefreshKind::new().with_ram())
                .with_cpu(CpuRefreshKind::new()),
        );

        let total_ram_mb = system.total_memory() / (1024 * 1024);
        let cpu_cores = match system.cpus().len() {
            0 => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            n => n,
        };
        let fd_limit = read_fd_limit().unwrap_or(FALLBACK_FD_LIMIT);

        debug!(total_ram_mb, cpu_cores, fd_limit, "Probed host resources");

        Self {
            total_ram_mb,
            cpu_cores,
            fd_limit,
        }
    }
}

#[cfg(unix)]
fn read_fd_limit() -> Option<u64> {
    use nix::sys::resource::{getrlimit, Resource};

    getrlimit(Resource::RLIMIT_NOFILE)
        .ok()
        .map(|(soft, _hard)| soft as u64)
}

#[cfg(not(unix))]
fn read_fd_limit() -> Option<u64> {
    None
}
