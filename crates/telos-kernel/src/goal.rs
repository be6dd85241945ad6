//! Goal record and status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

/// Stable primary key for a goal.
pub type GoalId = Uuid;

/// Lifecycle status of a goal.
///
/// `Pending → Active → {Paused, Completed, Failed, Blocked}`;
/// `Paused ↔ Active`; `Blocked → Pending` once dependencies complete.
/// `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    Pending,
    Active,
    Paused,
    Completed,
    Failed,
    Blocked,
}

impl GoalStatus {
    /// Whether this status admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `self → to` is a legal transition.
    pub fn can_transition(&self, to: GoalStatus) -> bool {
        use GoalStatus::*;
        match (self, to) {
            // pending goals may fail without ever activating when their
            // job exhausts its attempts
            (Pending, Active) | (Pending, Blocked) | (Pending, Failed) => true,
            (Active, Paused) | (Active, Completed) | (Active, Failed) | (Active, Blocked) => true,
            (Paused, Active) => true,
            (Blocked, Pending) | (Blocked, Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for GoalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
        };
        write!(f, "{s}")
    }
}

/// A high-level objective the engine works to resolve.
///
/// Created by the external API, mutated only by the agent loop (through
/// the goal manager), destroyed by retention policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub id: GoalId,
    pub tenant_id: String,
    pub description: String,
    /// Scheduling weight in `[0, 1]`.
    pub priority: f64,
    pub status: GoalStatus,
    pub parent_id: Option<GoalId>,
    pub dependencies: HashSet<GoalId>,
    /// Caller-supplied constraints consulted during parameter binding.
    pub constraints: HashMap<String, serde_json::Value>,
    /// Completion estimate in `[0, 1]`, monotonic non-decreasing while active.
    pub progress: f64,
    /// Last error kind recorded against the goal, if any.
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Goal {
    /// Construct a new pending goal.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidInput`] if the description is empty
    /// or the priority lies outside `[0, 1]`.
    pub fn new(
        tenant_id: impl Into<String>,
        description: impl Into<String>,
        priority: f64,
        now: DateTime<Utc>,
    ) -> EngineResult<Self> {
        let description = description.into();
        if description.trim().is_empty() {
            return Err(EngineError::InvalidInput(
                "goal description must be non-empty".into(),
            ));
        }
        if !(0.0..=1.0).contains(&priority) {
            return Err(EngineError::InvalidInput(format!(
                "goal priority {priority} outside [0, 1]"
            )));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            description,
            priority,
            status: GoalStatus::Pending,
            parent_id: None,
            dependencies: HashSet::new(),
            constraints: HashMap::new(),
            progress: 0.0,
            last_error: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Add a dependency this goal must wait on.
    #[must_use]
    pub fn with_dependency(mut self, dep: GoalId) -> Self {
        self.dependencies.insert(dep);
        self
    }

    /// Attach a constraint consulted during planning.
    #[must_use]
    pub fn with_constraint(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.constraints.insert(key.into(), value);
        self
    }

    /// Apply a status transition, enforcing the state machine.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidTransition`] on violation.
    pub fn transition(&mut self, to: GoalStatus, now: DateTime<Utc>) -> EngineResult<()> {
        if self.status == to {
            return Ok(());
        }
        if !self.status.can_transition(to) {
            return Err(EngineError::invalid_transition(self.status, to));
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    /// Advance progress. Progress is monotonic while the goal is active.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidInput`] if `progress` is outside
    /// `[0, 1]`, or [`EngineError::InvalidTransition`] if it would move
    /// backwards while the goal is active.
    pub fn advance_progress(&mut self, progress: f64, now: DateTime<Utc>) -> EngineResult<()> {
        if !(0.0..=1.0).contains(&progress) {
            return Err(EngineError::InvalidInput(format!(
                "progress {progress} outside [0, 1]"
            )));
        }
        if self.status == GoalStatus::Active && progress < self.progress {
            return Err(EngineError::InvalidTransition {
                from: format!("progress {}", self.progress),
                to: format!("progress {progress}"),
            });
        }
        self.progress = progress;
        self.updated_at = now;
        Ok(())
    }
}
