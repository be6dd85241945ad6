//! Plans — ordered sequences of planned actions for one goal and one cycle.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::goal::GoalId;

/// One abstract step of a plan, bound to a concrete tool and parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedAction {
    /// Tool to invoke.
    pub tool_name: String,
    /// Bound parameters.
    pub parameters: HashMap<String, serde_json::Value>,
    /// Why the planner chose this step.
    pub rationale: String,
    /// Tag describing the outcome the planner expects.
    pub expected_outcome: String,
    /// Set when a required parameter could not be bound; the plan
    /// terminates at this step.
    pub needs_clarification: bool,
}

impl PlannedAction {
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            parameters: HashMap::new(),
            rationale: String::new(),
            expected_outcome: String::new(),
            needs_clarification: false,
        }
    }

    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }

    #[must_use]
    pub fn with_expected_outcome(mut self, tag: impl Into<String>) -> Self {
        self.expected_outcome = tag.into();
        self
    }
}

/// An ordered plan for a single goal and cycle.
///
/// Plans are not persisted beyond the cycle that produced them; only
/// [`Plan::signature_hash`] survives, as the key for learning updates.
/// An empty plan is valid and signals the agent loop to block the goal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub goal_id: GoalId,
    /// The goal class the planner resolved, e.g. `research` or `generic`.
    pub goal_class: String,
    pub steps: Vec<PlannedAction>,
    /// Interchangeable candidates for the current position, scored by the
    /// action selector alongside the first unfinished step.
    pub alternatives: Vec<PlannedAction>,
    /// Present when the plan is empty or truncated.
    pub block_reason: Option<String>,
    /// True when the plan came from a learning hint rather than a template.
    pub from_learning: bool,
}

impl Plan {
    pub fn new(goal_id: GoalId, goal_class: impl Into<String>) -> Self {
        Self {
            goal_id,
            goal_class: goal_class.into(),
            steps: Vec::new(),
            alternatives: Vec::new(),
            block_reason: None,
            from_learning: false,
        }
    }

    /// An empty plan carrying the reason the goal cannot proceed.
    pub fn blocked(goal_id: GoalId, goal_class: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            goal_id,
            goal_class: goal_class.into(),
            steps: Vec::new(),
            alternatives: Vec::new(),
            block_reason: Some(reason.into()),
            from_learning: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// The ordered tool names of this plan.
    pub fn tool_sequence(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.tool_name.clone()).collect()
    }

    /// Stable hash over the goal class and tool sequence, used to key
    /// learning updates for the cycle that executed this plan.
    pub fn signature_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.goal_class.hash(&mut hasher);
        for step in &self.steps {
            step.tool_name.hash(&mut hasher);
        }
        hasher.finish()
    }
}
