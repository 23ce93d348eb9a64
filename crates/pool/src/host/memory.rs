//! Host memory pressure monitoring
//!
//! The pool consults memory pressure on every miss and hot hit, and the
//! janitor on every scan, so the live implementation caches its reading.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sysinfo::{MemoryRefreshKind, RefreshKind, System};

/// How long a memory reading stays fresh.
const DEFAULT_CACHE_TTL: Duration = Duration::from_millis(500);

/// Source of the host's current memory utilisation
pub trait MemoryMonitor: Send + Sync {
    /// Used memory as a percentage of total (0.0 - 100.0)
    fn memory_percent(&self) -> f64;
}

struct MonitorState {
    system: System,
    last: Option<(Instant, f64)>,
}

/// [`MemoryMonitor`] backed by `sysinfo`
pub struct SystemMemoryMonitor {
    state: Mutex<MonitorState>,
    cache_ttl: Duration,
}

impl SystemMemoryMonitor {
    /// Create a monitor with the default 500ms cache
    pub fn new() -> Self {
        Self::with_cache_ttl(DEFAULT_CACHE_TTL)
    }

    /// Create a monitor with a custom cache lifetime
    pub fn with_cache_ttl(cache_ttl: Duration) -> Self {
        let system = System::new_with_specifics(
            RefreshKind::new().with_memory(MemoryRefreshKind::new().with_ram()),
        );
        Self {
            state: Mutex::new(MonitorState { system, last: None }),
            cache_ttl,
        }
    }
}

impl Default for SystemMemoryMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMonitor for SystemMemoryMonitor {
    fn memory_percent(&self) -> f64 {
        let mut state = self.state.lock();

        if let Some((read_at, percent)) = state.last {
            if read_at.elapsed() < self.cache_ttl {
                return percent;
            }
        }

        state.system.refresh_memory();
        let total = state.system.total_memory();
        let percent = if total == 0 {
            0.0
        } else {
            state.system.used_memory() as f64 / total as f64 * 100.0
        };

        state.last = Some((Instant::now(), percent));
        percent
    }
}

/// [`MemoryMonitor`] returning a settable value
///
/// Useful in tests and for hosts where memory is accounted elsewhere.
#[derive(Debug)]
pub struct FixedMemoryMonitor {
    bits: AtomicU64,
}

impl FixedMemoryMonitor {
    /// Create a monitor reporting `percent`
    pub fn new(percent: f64) -> Self {
        Self {
            bits: AtomicU64::new(percent.to_bits()),
        }
    }

    /// Change the reported percentage
    pub fn set(&self, percent: f64) {
        self.bits.store(percent.to_bits(), Ordering::Relaxed);
    }
}

impl Default for FixedMemoryMonitor {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl MemoryMonitor for FixedMemoryMonitor {
    fn memory_percent(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_monitor_is_settable() {
        let monitor = FixedMemoryMonitor::new(42.5);
        assert_eq!(monitor.memory_percent(), 42.5);

        monitor.set(91.0);
        assert_eq!(monitor.memory_percent(), 91.0);
    }

    #[test]
    fn test_system_monitor_reports_percentage() {
        let monitor = SystemMemoryMonitor::new();
        let percent = monitor.memory_percent();
        assert!((0.0..=100.0).contains(&percent));

        // Second read within the cache window returns the cached value
        assert_eq!(monitor.memory_percent(), percent);
    }
}
