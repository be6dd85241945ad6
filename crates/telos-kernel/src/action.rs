//! Actions — materialized plan steps with an execution lifecycle.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::goal::GoalId;
use crate::plan::PlannedAction;

/// Stable primary key for an action.
pub type ActionId = Uuid;

/// Execution status of a materialized action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Failed at least once and was re-attempted under the tool policy.
    Retried,
    Cancelled,
}

/// A [`PlannedAction`] materialized for execution.
///
/// Owned by the cycle that produced it; appended to episodic memory on
/// completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    pub goal_id: GoalId,
    pub tool_name: String,
    pub parameters: HashMap<String, serde_json::Value>,
    /// Epoch milliseconds at which execution started.
    pub started_at: u64,
    pub finished_at: Option<u64>,
    pub status: ActionStatus,
    /// Total invocation attempts, including the first.
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl Action {
    /// Materialize a planned step for the given goal.
    pub fn materialize(goal_id: GoalId, step: &PlannedAction, now_millis: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            goal_id,
            tool_name: step.tool_name.clone(),
            parameters: step.parameters.clone(),
            started_at: now_millis,
            finished_at: None,
            status: ActionStatus::Pending,
            attempts: 0,
            last_error: None,
        }
    }

    /// Record completion state after the tool invocation returns.
    pub fn finish(
        &mut self,
        status: ActionStatus,
        attempts: u32,
        last_error: Option<String>,
        now_millis: u64,
    ) {
        self.status = status;
        self.attempts = attempts;
        self.last_error = last_error;
        self.finished_at = Some(now_millis);
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}
