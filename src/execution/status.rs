//! Execution Status
//!
//! Status values shared by workflow executions and their parent action
//! executions, plus the table of legal transitions.
//!
//! ```text
//! requested -> running -> succeeded | failed | canceled | timed_out
//!              running <-> paused
//!              paused  -> canceled | timed_out
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle status of an execution.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Accepted, waiting for the scheduler
    Requested,
    /// Tasks may start and complete
    Running,
    /// Suspended; in-flight tasks may still report completion
    Paused,
    Succeeded,
    Failed,
    Canceled,
    TimedOut,
}

impl ExecutionStatus {
    pub const ALL: [ExecutionStatus; 7] = [
        Self::Requested,
        Self::Running,
        Self::Paused,
        Self::Succeeded,
        Self::Failed,
        Self::Canceled,
        Self::TimedOut,
    ];

    /// Returns true once no further mutation is permitted.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Canceled | Self::TimedOut
        )
    }

    /// Returns true if the transition `self -> target` is legal.
    pub fn can_transition_to(&self, target: ExecutionStatus) -> bool {
        use ExecutionStatus::*;

        matches!(
            (self, target),
            (Requested, Running)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Canceled)
                | (Running, TimedOut)
                | (Paused, Canceled)
                | (Paused, TimedOut)
        )
    }

    /// Status the parent action execution shows for a child in `self`.
    ///
    /// The parent is already running while the child waits to be scheduled,
    /// so `requested` collapses into `running`.
    pub fn parent_view(&self) -> ExecutionStatus {
        match self {
            Self::Requested => Self::Running,
            other => *other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|status| status.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Unknown execution status: {}", s))
    }
}
