//! Pressure-driven sweep schedule

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::duration_millis;

/// Interval and TTLs for one janitor iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepPlan {
    /// Sleep before the sweep
    #[serde(with = "duration_millis")]
    pub scan_interval: Duration,

    /// Idle time after which a cold worker is closed
    #[serde(with = "duration_millis")]
    pub cold_ttl: Duration,

    /// Idle time after which a hot worker is closed
    #[serde(with = "duration_millis")]
    pub hot_ttl: Duration,
}

impl SweepPlan {
    pub fn new(scan_interval: Duration, cold_ttl: Duration, hot_ttl: Duration) -> Self {
        Self {
            scan_interval,
            cold_ttl,
            hot_ttl,
        }
    }
}

/// Plan used once memory climbs strictly above `above_percent`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PressureLevel {
    pub above_percent: f64,
    #[serde(flatten)]
    pub plan: SweepPlan,
}

/// Janitor configuration
///
/// The highest matching pressure level wins; below every level the relaxed
/// plan applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JanitorConfig {
    pub levels: Vec<PressureLevel>,
    pub relaxed: SweepPlan,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            levels: vec![
                PressureLevel {
                    above_percent: 80.0,
                    plan: SweepPlan::new(
                        Duration::from_secs(10),
                        Duration::from_secs(30),
                        Duration::from_secs(60),
                    ),
                },
                PressureLevel {
                    above_percent: 60.0,
                    plan: SweepPlan::new(
                        Duration::from_secs(30),
                        Duration::from_secs(60),
                        Duration::from_secs(120),
                    ),
                },
            ],
            relaxed: SweepPlan::new(
                Duration::from_secs(60),
                Duration::from_secs(300),
                Duration::from_secs(600),
            ),
        }
    }
}

impl JanitorConfig {
    /// Create a janitor configuration with the default schedule
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pressure level
    pub fn with_level(mut self, above_percent: f64, plan: SweepPlan) -> Self {
        self.levels.push(PressureLevel {
            above_percent,
            plan,
        });
        self
    }

    /// Drop every pressure level so the relaxed plan always applies
    pub fn without_levels(mut self) -> Self {
        self.levels.clear();
        self
    }

    /// Set the plan used below every pressure level
    pub fn with_relaxed(mut self, plan: SweepPlan) -> Self {
        self.relaxed = plan;
        self
    }

    /// Select the plan for the given memory percentage
    pub fn plan_for(&self, memory_percent: f64) -> SweepPlan {
        self.levels
            .iter()
            .filter(|level| memory_percent > level.above_percent)
            .max_by(|a, b| a.above_percent.total_cmp(&b.above_percent))
            .map(|level| level.plan)
            .unwrap_or(self.relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let config = JanitorConfig::default();

        let critical = config.plan_for(85.0);
        assert_eq!(critical.scan_interval, Duration::from_secs(10));
        assert_eq!(critical.cold_ttl, Duration::from_secs(30));
        assert_eq!(critical.hot_ttl, Duration::from_secs(60));

        let elevated = config.plan_for(70.0);
        assert_eq!(elevated.scan_interval, Duration::from_secs(30));
        assert_eq!(elevated.cold_ttl, Duration::from_secs(60));
        assert_eq!(elevated.hot_ttl, Duration::from_secs(120));

        let relaxed = config.plan_for(20.0);
        assert_eq!(relaxed.scan_interval, Duration::from_secs(60));
        assert_eq!(relaxed.cold_ttl, Duration::from_secs(300));
        assert_eq!(relaxed.hot_ttl, Duration::from_secs(600));
    }

    #[test]
    fn test_thresholds_are_strict() {
        let config = JanitorConfig::default();
        assert_eq!(config.plan_for(80.0), config.plan_for(70.0));
        assert_eq!(config.plan_for(60.0), config.relaxed);
    }

    #[test]
    fn test_level_order_does_not_matter() {
        let urgent = SweepPlan::new(
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(3),
        );
        let config = JanitorConfig::default().with_level(95.0, urgent);

        assert_eq!(config.plan_for(97.0), urgent);
        assert_eq!(config.plan_for(90.0).scan_interval, Duration::from_secs(10));
    }

    #[test]
    fn test_serde_uses_millis() {
        let json = serde_json::to_value(JanitorConfig::default()).unwrap();
        assert_eq!(json["relaxed"]["scan_interval"], 60_000);
        assert_eq!(json["levels"][0]["above_percent"], 80.0);
        assert_eq!(json["levels"][0]["cold_ttl"], 30_000);

        let back: JanitorConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, JanitorConfig::default());
    }
}
