//! Fleet configuration
//!
//! Loaded from `CRAWLFLEET_*` environment variables; anything unset or
//! unparseable keeps its default.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::failover::FailoverConfig;
use crate::janitor::JanitorConfig;
use crate::pool::PoolConfig;

const PREFIX: &str = "CRAWLFLEET_";

/// Configuration for every component of the fleet
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FleetConfig {
    pub pool: PoolConfig,
    pub janitor: JanitorConfig,
    pub failover: FailoverConfig,
    /// Where the container registry is persisted (in-memory when unset)
    pub registry_path: Option<PathBuf>,
}

impl FleetConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables (all prefixed with `CRAWLFLEET_`):
    /// - `MEM_HEADROOM_MB`, `AVG_WORKER_MEM_MB`, `FD_PER_WORKER`, `CORE_MULTIPLIER`,
    ///   `MIN_CAPACITY`, `MAX_CAPACITY`, `AUTO_SIZE_CAPACITY`: capacity sizing
    /// - `BACKUP_SLOT_COUNT`, `MAX_WAIT_SECS`, `THROTTLE_THRESHOLD_PERCENT`,
    ///   `THROTTLE_DELAY_MIN_MS`, `THROTTLE_DELAY_MAX_MS`,
    ///   `PRIMARY_RELOAD_DELAY_SECS`, `SECONDARY_RELOAD_DELAY_SECS`: failover
    /// - `PERMANENT_ENABLED`, `PROMOTION_THRESHOLD`, `MAX_USAGE_COUNT`,
    ///   `RETIRE_MIN_USAGE`, `RETIRE_MEMORY_PERCENT`, `MEMORY_CEILING_PERCENT`: pool
    /// - `REGISTRY_PATH`: registry file
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from any key/value source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };
        let mut config = Self::default();

        let sizing = &mut config.failover.sizing;
        vars.set("MEM_HEADROOM_MB", &mut sizing.mem_headroom_mb);
        vars.set("AVG_WORKER_MEM_MB", &mut sizing.avg_worker_mem_mb);
        vars.set("FD_PER_WORKER", &mut sizing.fd_per_worker);
        vars.set("CORE_MULTIPLIER", &mut sizing.core_multiplier);
        vars.set("MIN_CAPACITY", &mut sizing.min_capacity);
        vars.set("MAX_CAPACITY", &mut sizing.max_capacity);

        let failover = &mut config.failover;
        vars.set_flag("AUTO_SIZE_CAPACITY", &mut failover.auto_size_capacity);
        vars.set("BACKUP_SLOT_COUNT", &mut failover.backup_slot_count);
        vars.set_secs("MAX_WAIT_SECS", &mut failover.max_wait);
        vars.set("THROTTLE_THRESHOLD_PERCENT", &mut failover.throttle_threshold_percent);
        vars.set_millis("THROTTLE_DELAY_MIN_MS", &mut failover.throttle_delay_min);
        vars.set_millis("THROTTLE_DELAY_MAX_MS", &mut failover.throttle_delay_max);
        vars.set_secs("PRIMARY_RELOAD_DELAY_SECS", &mut failover.primary_reload_delay);
        vars.set_secs("SECONDARY_RELOAD_DELAY_SECS", &mut failover.secondary_reload_delay);

        let pool = &mut config.pool;
        vars.set_flag("PERMANENT_ENABLED", &mut pool.permanent_enabled);
        vars.set("PROMOTION_THRESHOLD", &mut pool.promotion_threshold);
        vars.set("MAX_USAGE_COUNT", &mut pool.max_usage_count);
        vars.set("RETIRE_MIN_USAGE", &mut pool.retire_min_usage);
        vars.set("RETIRE_MEMORY_PERCENT", &mut pool.retire_memory_percent);
        vars.set("MEMORY_CEILING_PERCENT", &mut pool.memory_ceiling_percent);

        // Same floors and ranges the PoolConfig builders enforce
        pool.promotion_threshold = pool.promotion_threshold.max(1);
        pool.max_usage_count = pool.max_usage_count.max(1);
        pool.retire_memory_percent = pool.retire_memory_percent.clamp(0.0, 100.0);
        pool.memory_ceiling_percent = pool.memory_ceiling_percent.clamp(0.0, 100.0);

        config.registry_path = vars
            .get("REGISTRY_PATH")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        config
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(&format!("{PREFIX}{name}")).map(|v| v.trim().to_string())
    }

    fn parse<T: FromStr>(&self, name: &str) -> Option<T> {
        self.get(name).and_then(|v| v.parse().ok())
    }

    fn set<T: FromStr>(&self, name: &str, target: &mut T) {
        if let Some(value) = self.parse(name) {
            *target = value;
        }
    }

    fn set_flag(&self, name: &str, target: &mut bool) {
        if let Some(value) = self.get(name) {
            *target = value.eq_ignore_ascii_case("true") || value == "1";
        }
    }

    fn set_secs(&self, name: &str, target: &mut Duration) {
        if let Some(secs) = self.parse::<u64>(name) {
            *target = Duration::from_secs(secs);
        }
    }

    fn set_millis(&self, name: &str, target: &mut Duration) {
        if let Some(millis) = self.parse::<u64>(name) {
            *target = Duration::from_millis(millis);
        }
    }
}

/// Serde support for Duration as milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
