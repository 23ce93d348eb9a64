//! Host-aware capacity sizing
//!
//! Converts host RAM, CPU core count and the file-descriptor limit into a
//! safe maximum number of concurrently usable workers.

use serde::{Deserialize, Serialize};

use crate::host::HostResources;

/// Per-worker cost assumptions used to size admission control
///
/// # Example
///
/// ```
/// use crawlfleet_pool::sizing::{compute_safe_capacity, SizingParams};
///
/// let params = SizingParams::default()
///     .with_mem_headroom_mb(512)
///     .with_avg_worker_mem_mb(150)
///     .with_capacity_bounds(1, 16);
///
/// assert_eq!(compute_safe_capacity(2048, 2, 1024, &params), 8);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SizingParams {
    /// RAM reserved for the OS and the service itself
    pub mem_headroom_mb: u64,

    /// Average resident memory of one worker (0 = unconstrained)
    pub avg_worker_mem_mb: u64,

    /// File descriptors consumed by one worker (0 = unconstrained)
    pub fd_per_worker: u64,

    /// Workers allowed per CPU core
    pub core_multiplier: u64,

    /// Floor returned whenever the host looks too small
    pub min_capacity: usize,

    /// Hard ceiling, also the capacity when auto-sizing is disabled
    pub max_capacity: usize,
}

impl Default for SizingParams {
    fn default() -> Self {
        Self {
            mem_headroom_mb: 512,
            avg_worker_mem_mb: 150,
            fd_per_worker: 20,
            core_multiplier: 4,
            min_capacity: 1,
            max_capacity: 16,
        }
    }
}

impl SizingParams {
    /// Create sizing parameters with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the memory headroom
    pub fn with_mem_headroom_mb(mut self, mb: u64) -> Self {
        self.mem_headroom_mb = mb;
        self
    }

    /// Set the average per-worker memory
    pub fn with_avg_worker_mem_mb(mut self, mb: u64) -> Self {
        self.avg_worker_mem_mb = mb;
        self
    }

    /// Set the file descriptors used per worker
    pub fn with_fd_per_worker(mut self, fds: u64) -> Self {
        self.fd_per_worker = fds;
        self
    }

    /// Set the per-core multiplier
    pub fn with_core_multiplier(mut self, multiplier: u64) -> Self {
        self.core_multiplier = multiplier;
        self
    }

    /// Set the capacity bounds
    pub fn with_capacity_bounds(mut self, min: usize, max: usize) -> Self {
        self.min_capacity = min;
        self.max_capacity = max;
        self
    }

    /// Capacity for admission control
    ///
    /// With auto-sizing disabled the configured maximum is used verbatim.
    pub fn resolve_capacity(&self, auto_size: bool, host: &HostResources) -> usize {
        if !auto_size {
            return self.max_capacity;
        }
        capacity_breakdown(host.total_ram_mb, host.cpu_cores, host.fd_limit, self).capacity
    }
}

/// The host dimension that bounds capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Constraint {
    /// RAM left after headroom is exhausted
    Headroom,
    Memory,
    FileDescriptors,
    Cpu,
}

impl std::fmt::Display for Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Headroom => write!(f, "headroom"),
            Self::Memory => write!(f, "memory"),
            Self::FileDescriptors => write!(f, "file_descriptors"),
            Self::Cpu => write!(f, "cpu"),
        }
    }
}

/// Every intermediate ceiling of a capacity computation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityBreakdown {
    /// RAM left after headroom (may be negative)
    pub available_ram_mb: i64,
    /// `None` when the dimension does not constrain
    pub mem_ceiling: Option<u64>,
    pub fd_ceiling: Option<u64>,
    pub cpu_ceiling: u64,
    /// Dimension that produced the unclamped minimum
    pub binding: Constraint,
    /// Final clamped capacity
    pub capacity: usize,
}

/// Compute the safe number of concurrent workers for a host
///
/// Returns a value in `[min_capacity, max_capacity]`; when the two bounds
/// are inverted the minimum wins.
pub fn compute_safe_capacity(
    host_ram_mb: u64,
    cpu_cores: usize,
    fd_limit: u64,
    params: &SizingParams,
) -> usize {
    capacity_breakdown(host_ram_mb, cpu_cores, fd_limit, params).capacity
}

/// Like [`compute_safe_capacity`], keeping each ceiling for reporting
pub fn capacity_breakdown(
    host_ram_mb: u64,
    cpu_cores: usize,
    fd_limit: u64,
    params: &SizingParams,
) -> CapacityBreakdown {
    let available_ram_mb = host_ram_mb as i64 - params.mem_headroom_mb as i64;
    let cpu_ceiling = (cpu_cores as u64).saturating_mul(params.core_multiplier);

    if available_ram_mb <= 0 {
        return CapacityBreakdown {
            available_ram_mb,
            mem_ceiling: Some(0),
            fd_ceiling: checked_ceiling(fd_limit, params.fd_per_worker),
            cpu_ceiling,
            binding: Constraint::Headroom,
            capacity: params.min_capacity,
        };
    }

    let mem_ceiling = checked_ceiling(available_ram_mb as u64, params.avg_worker_mem_mb);
    let fd_ceiling = checked_ceiling(fd_limit, params.fd_per_worker);

    let mut binding = Constraint::Cpu;
    let mut raw = cpu_ceiling;
    if let Some(mem) = mem_ceiling.filter(|&mem| mem < raw) {
        raw = mem;
        binding = Constraint::Memory;
    }
    if let Some(fd) = fd_ceiling.filter(|&fd| fd < raw) {
        raw = fd;
        binding = Constraint::FileDescriptors;
    }

    let raw = usize::try_from(raw).unwrap_or(usize::MAX);
    let capacity = raw.min(params.max_capacity).max(params.min_capacity);

    CapacityBreakdown {
        available_ram_mb,
        mem_ceiling,
        fd_ceiling,
        cpu_ceiling,
        binding,
        capacity,
    }
}

/// Integer division where a zero cost means "no constraint"
fn checked_ceiling(budget: u64, cost: u64) -> Option<u64> {
    budget.checked_div(cost)
}
