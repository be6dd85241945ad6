//! Goal manager — priority queue with dependencies and status tracking.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::DateTime;
use parking_lot::{Mutex, RwLock};
use tracing::info;

use telos_kernel::clock::Clock;
use telos_kernel::error::{EngineError, EngineResult};
use telos_kernel::goal::{Goal, GoalId, GoalStatus};

use crate::learning::signature::tokenize;

/// Window within which an identical `(tenant, description)` add is
/// treated as an accidental duplicate.
const DEDUP_WINDOW_MS: u64 = 10_000;

/// Read filter for [`GoalManager::list`].
#[derive(Debug, Clone, Default)]
pub struct GoalFilter {
    pub tenant_id: Option<String>,
    pub status: Option<GoalStatus>,
}

/// Owns every goal record and enforces the status state machine.
pub struct GoalManager {
    goals: RwLock<HashMap<GoalId, Goal>>,
    recent_adds: Mutex<VecDeque<(String, String, u64)>>,
    failure_streaks: Mutex<HashMap<GoalId, u32>>,
    clock: Arc<dyn Clock>,
}

impl GoalManager {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            goals: RwLock::new(HashMap::new()),
            recent_adds: Mutex::new(VecDeque::new()),
            failure_streaks: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        DateTime::from_timestamp_millis(self.clock.now_millis() as i64).unwrap_or_default()
    }

    /// Register a new goal.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidInput`] for an invalid record or a
    /// duplicate `(tenant, normalized description)` within the dedup
    /// window.
    pub fn add(&self, goal: Goal) -> EngineResult<GoalId> {
        if goal.description.trim().is_empty() {
            return Err(EngineError::InvalidInput(
                "goal description must be non-empty".into(),
            ));
        }
        if !(0.0..=1.0).contains(&goal.priority) {
            return Err(EngineError::InvalidInput(format!(
                "goal priority {} outside [0, 1]",
                goal.priority
            )));
        }

        let normalized = tokenize(&goal.description).join(" ");
        let now = self.clock.now_millis();
        {
            let mut recent = self.recent_adds.lock();
            while recent
                .front()
                .is_some_and(|(_, _, ts)| now.saturating_sub(*ts) > DEDUP_WINDOW_MS)
            {
                recent.pop_front();
            }
            let duplicate = recent
                .iter()
                .any(|(tenant, desc, _)| *tenant == goal.tenant_id && *desc == normalized);
            if duplicate {
                return Err(EngineError::InvalidInput(format!(
                    "duplicate goal for tenant '{}' within {}ms window",
                    goal.tenant_id, DEDUP_WINDOW_MS
                )));
            }
            recent.push_back((goal.tenant_id.clone(), normalized, now));
        }

        let id = goal.id;
        info!(goal_id = %id, tenant = %goal.tenant_id, "goal added");
        self.goals.write().insert(id, goal);
        Ok(id)
    }

    /// The highest-priority pending goal whose dependencies are all
    /// completed. Ties break toward the earliest `created_at`, then the
    /// lowest id. Blocked goals whose dependencies have since completed
    /// are released back to pending first.
    pub fn next(&self, tenant_id: Option<&str>) -> Option<Goal> {
        self.release_unblocked(tenant_id);
        let goals = self.goals.read();
        goals
            .values()
            .filter(|g| g.status == GoalStatus::Pending)
            .filter(|g| tenant_id.is_none_or(|t| g.tenant_id == t))
            .filter(|g| self.dependencies_completed(&goals, g))
            .min_by(|a, b| {
                b.priority
                    .partial_cmp(&a.priority)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.created_at.cmp(&b.created_at))
                    .then(a.id.cmp(&b.id))
            })
            .cloned()
    }

    fn dependencies_completed(&self, goals: &HashMap<GoalId, Goal>, goal: &Goal) -> bool {
        goal.dependencies.iter().all(|dep| {
            goals
                .get(dep)
                .is_some_and(|d| d.status == GoalStatus::Completed)
        })
    }

    fn release_unblocked(&self, tenant_id: Option<&str>) {
        let now = self.now();
        let mut goals = self.goals.write();
        let releasable: Vec<GoalId> = goals
            .values()
            .filter(|g| g.status == GoalStatus::Blocked)
            .filter(|g| tenant_id.is_none_or(|t| g.tenant_id == t))
            .filter(|g| !g.dependencies.is_empty())
            .filter(|g| self.dependencies_completed(&goals, g))
            .map(|g| g.id)
            .collect();
        for id in releasable {
            if let Some(goal) = goals.get_mut(&id) {
                let _ = goal.transition(GoalStatus::Pending, now);
            }
        }
    }

    /// Apply a status transition, optionally advancing progress.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidTransition`] on a state-machine
    /// violation, including activating a goal whose dependencies are not
    /// all completed, and `InvalidInput` for unknown ids.
    pub fn mark(
        &self,
        id: GoalId,
        status: GoalStatus,
        progress: Option<f64>,
    ) -> EngineResult<Goal> {
        let now = self.now();
        let mut goals = self.goals.write();

        if status == GoalStatus::Active {
            let ready = goals
                .get(&id)
                .map(|g| self.dependencies_completed(&goals, g))
                .unwrap_or(false);
            if !ready && goals.contains_key(&id) {
                return Err(EngineError::InvalidTransition {
                    from: "pending".into(),
                    to: "active with incomplete dependencies".into(),
                });
            }
        }

        let goal = goals
            .get_mut(&id)
            .ok_or_else(|| EngineError::InvalidInput(format!("unknown goal {id}")))?;
        goal.transition(status, now)?;
        if let Some(progress) = progress {
            goal.advance_progress(progress, now)?;
        }
        if status.is_terminal() {
            self.failure_streaks.lock().remove(&id);
        }
        Ok(goal.clone())
    }

    /// Record a failed cycle for the goal; returns the current streak.
    pub fn record_failure(&self, id: GoalId, error_kind: &str) -> u32 {
        if let Some(goal) = self.goals.write().get_mut(&id) {
            goal.last_error = Some(error_kind.to_string());
        }
        let mut streaks = self.failure_streaks.lock();
        let streak = streaks.entry(id).or_insert(0);
        *streak += 1;
        *streak
    }

    /// Reset the failure streak after a successful cycle.
    pub fn reset_failures(&self, id: GoalId) {
        self.failure_streaks.lock().remove(&id);
    }

    pub fn get(&self, id: GoalId) -> Option<Goal> {
        self.goals.read().get(&id).cloned()
    }

    /// Read-only filtered view, ordered by creation time.
    pub fn list(&self, filter: &GoalFilter) -> Vec<Goal> {
        let goals = self.goals.read();
        let mut out: Vec<Goal> = goals
            .values()
            .filter(|g| {
                filter
                    .tenant_id
                    .as_deref()
                    .is_none_or(|t| g.tenant_id == t)
            })
            .filter(|g| filter.status.is_none_or(|s| g.status == s))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        out
    }

    /// Remove terminal goals older than the retention period.
    pub fn retain_recent(&self, max_age_ms: u64) -> usize {
        let cutoff = self.clock.now_millis().saturating_sub(max_age_ms);
        let cutoff = DateTime::from_timestamp_millis(cutoff as i64).unwrap_or_default();
        let mut goals = self.goals.write();
        let before = goals.len();
        goals.retain(|_, g| !g.status.is_terminal() || g.updated_at >= cutoff);
        before - goals.len()
    }
}
