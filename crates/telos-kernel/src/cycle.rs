//! Cycle outputs — what one pass of the agent loop reports back.

use serde::{Deserialize, Serialize};

use crate::goal::{GoalId, GoalStatus};

/// How the cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    /// No eligible goal was available.
    Idle,
    /// The goal advanced and remains active.
    Progressed,
    /// The goal reached a terminal or blocked state this cycle.
    Settled,
}

/// Result of one agent-loop cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleResult {
    pub status: CycleStatus,
    /// The goal the cycle operated on, if any.
    pub goal_id: Option<GoalId>,
    /// Goal status after the cycle, if a goal was worked.
    pub goal_status: Option<GoalStatus>,
    /// Progress gained this cycle.
    pub progress_delta: f64,
    /// Number of actions executed (0 or 1 per the single-step cycle).
    pub actions_taken: u32,
}

impl CycleResult {
    /// The result of a cycle that found nothing to do.
    pub fn idle() -> Self {
        Self {
            status: CycleStatus::Idle,
            goal_id: None,
            goal_status: None,
            progress_delta: 0.0,
            actions_taken: 0,
        }
    }
}

/// Non-authoritative annotation handed to the next cycle's planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleHint {
    /// Latency or payload anomaly: narrow the parameters next time.
    RetryWithSmallerScope,
    /// The outcome was weak: rebind parameters from fresher context.
    RefineParameters,
}

impl CycleHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RetryWithSmallerScope => "retry-with-smaller-scope",
            Self::RefineParameters => "refine-parameters",
        }
    }
}
