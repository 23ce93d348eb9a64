//! Failover slots

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::worker::Worker;

/// Position of a slot in the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotRole {
    Primary,
    /// Backup number `n`, starting at 1
    Secondary(usize),
}

impl SlotRole {
    /// Role of the slot at `index`; slot 0 is the primary
    pub fn for_index(index: usize) -> Self {
        match index {
            0 => Self::Primary,
            n => Self::Secondary(n),
        }
    }

    pub fn is_primary(&self) -> bool {
        matches!(self, Self::Primary)
    }
}

impl fmt::Display for SlotRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Secondary(n) => write!(f, "secondary-{n}"),
        }
    }
}

/// Healing state of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReloadState {
    Idle,
    Healing,
}

/// One worker position in the orchestrator
pub(crate) struct FailoverSlot {
    pub(crate) role: SlotRole,
    pub(crate) worker: Option<Arc<dyn Worker>>,
    pub(crate) healthy: bool,
    pub(crate) reload: ReloadState,
    pub(crate) generation: u64,
}

impl FailoverSlot {
    pub(crate) fn new(role: SlotRole) -> Self {
        Self {
            role,
            worker: None,
            healthy: false,
            reload: ReloadState::Idle,
            generation: 0,
        }
    }

    /// Replace the worker and mark the slot healthy
    pub(crate) fn install(&mut self, worker: Arc<dyn Worker>) {
        self.worker = Some(worker);
        self.healthy = true;
        self.generation += 1;
    }

    /// Move to `Healing`; false if a heal is already in flight
    pub(crate) fn begin_healing(&mut self) -> bool {
        if self.reload == ReloadState::Healing {
            return false;
        }
        self.reload = ReloadState::Healing;
        true
    }

    pub(crate) fn finish_healing(&mut self) {
        self.reload = ReloadState::Idle;
    }

    pub(crate) fn is_usable(&self) -> bool {
        self.healthy && self.worker.is_some()
    }
}
