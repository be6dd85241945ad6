//! The agent loop: one cycle of plan → select → invoke → observe → learn.
//!
//! A cycle advances exactly one goal by at most one action. Tool
//! failures become observations, never panics; only infrastructure
//! errors escape. The enclosing job's visibility deadline doubles as the
//! cycle's cancellation deadline.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use telos_kernel::action::{Action, ActionStatus};
use telos_kernel::cycle::{CycleResult, CycleStatus};
use telos_kernel::error::{EngineError, EngineResult};
use telos_kernel::goal::{Goal, GoalId, GoalStatus};
use telos_kernel::memory::{EpisodeKind, EpisodicEntry};
use telos_kernel::tool::{InvocationRecord, ToolErrorKind};

use crate::context::WorkerContext;

/// TTL for planner hints parked in working memory between cycles.
const HINT_TTL_MS: u64 = 600_000;

/// Drives cycles against a [`WorkerContext`].
pub struct EngineLoop {
    ctx: Arc<WorkerContext>,
}

impl EngineLoop {
    pub fn new(ctx: Arc<WorkerContext>) -> Self {
        Self { ctx }
    }

    /// Run one cycle for the tenant.
    ///
    /// `goal_ref` pins the cycle to a specific goal; `None` picks the
    /// next eligible one. `deadline_ms` is the epoch-millisecond cancel
    /// deadline inherited from the job's visibility lease.
    ///
    /// # Errors
    ///
    /// Only [`EngineError::Infrastructure`] escapes; every other failure
    /// is folded into goal status and observations.
    pub async fn run_cycle(
        &self,
        tenant_id: &str,
        goal_ref: Option<GoalId>,
        deadline_ms: Option<u64>,
    ) -> EngineResult<CycleResult> {
        let ctx = &self.ctx;

        // 1. resolve the goal to work
        let goal = match self.resolve_goal(tenant_id, goal_ref) {
            Ok(Some(goal)) => goal,
            Ok(None) => return Ok(CycleResult::idle()),
            Err(settled) => return Ok(settled),
        };
        let prev_progress = goal.progress;
        info!(tenant = tenant_id, goal = %goal.id, "cycle started");

        // 2. activate
        let goal = match ctx.goals.mark(goal.id, GoalStatus::Active, None) {
            Ok(goal) => goal,
            Err(EngineError::InvalidTransition { .. }) => {
                // dependencies regressed between resolve and mark
                let marked = ctx
                    .goals
                    .mark(goal.id, GoalStatus::Blocked, None)
                    .unwrap_or(goal);
                return Ok(self.settled(&marked, 0.0, 0));
            }
            Err(e) => return Err(e),
        };

        // 3. recall prior experience
        let hint = ctx.learning.recall(&goal, ctx.tools.as_ref());

        // 4. plan
        let context = ctx.memory.context_summary(&goal);
        let plan = ctx
            .planner
            .plan(&goal, ctx.tools.as_ref(), &context, hint.as_ref());
        if plan.is_empty() {
            let reason = plan
                .block_reason
                .clone()
                .unwrap_or_else(|| "empty plan".into());
            info!(%reason, "plan is empty, blocking goal");
            ctx.memory
                .append_note(tenant_id, json!({ "blocked": goal.id, "reason": reason }));
            let marked = ctx.goals.mark(goal.id, GoalStatus::Blocked, None)?;
            return Ok(self.settled(&marked, 0.0, 0));
        }

        // 5. select the next action
        let completed_steps = ((goal.progress * plan.len() as f64).round() as usize)
            .min(plan.len().saturating_sub(1));
        let step = match ctx
            .selector
            .select(&goal, &plan, &context, completed_steps, ctx.tools.as_ref())
        {
            Ok(step) => step,
            Err(e @ EngineError::InvalidInput(_)) => {
                warn!(error = %e, "selection failed, failing goal");
                ctx.goals.record_failure(goal.id, e.kind());
                let marked = ctx.goals.mark(goal.id, GoalStatus::Failed, None)?;
                ctx.storage.put_goal(&marked).await?;
                return Ok(self.settled(&marked, 0.0, 0));
            }
            Err(e) => return Err(e),
        };
        if step.needs_clarification {
            info!(tool = %step.tool_name, "step needs clarification, blocking goal");
            let marked = ctx.goals.mark(goal.id, GoalStatus::Blocked, None)?;
            return Ok(self.settled(&marked, 0.0, 0));
        }

        // 6. invoke the tool; validation errors become failure records
        let now = ctx.clock.now_millis();
        let mut action = Action::materialize(goal.id, &step, now);
        action.status = ActionStatus::Running;
        let record = match ctx
            .tools
            .invoke(&step.tool_name, &step.parameters, deadline_ms)
            .await
        {
            Ok(record) => record,
            Err(e @ (EngineError::InvalidInput(_) | EngineError::ToolNotFound(_))) => {
                InvocationRecord {
                    tool_name: step.tool_name.clone(),
                    success: false,
                    score: None,
                    signals: HashMap::new(),
                    payload: serde_json::Value::Null,
                    error_kind: Some(ToolErrorKind::Permanent),
                    error_message: Some(e.to_string()),
                    latency_ms: 0,
                    payload_bytes: 0,
                    attempts: 0,
                    fallback_used: false,
                    cancelled: false,
                }
            }
            Err(e) => return Err(e),
        };

        // 7. analyze and persist the observation
        let (observation, hints) = ctx.analyzer.analyze(&record, &action, &goal);
        let status = if record.cancelled {
            ActionStatus::Cancelled
        } else if observation.success {
            ActionStatus::Succeeded
        } else if record.attempts > 1 {
            ActionStatus::Retried
        } else {
            ActionStatus::Failed
        };
        action.finish(
            status,
            record.attempts,
            record.error_message.clone(),
            ctx.clock.now_millis(),
        );
        ctx.memory.append_cycle(tenant_id, &action, &observation);
        ctx.storage
            .append_episode(
                tenant_id,
                &EpisodicEntry {
                    seq: 0,
                    kind: EpisodeKind::Observation,
                    payload: serde_json::to_value(&observation)?,
                    ts: observation.produced_at,
                },
            )
            .await?;

        // 8. feed the selector
        ctx.selector.observe(&action, &observation, &plan.goal_class);
        if !hints.is_empty() {
            let hint_values: Vec<&str> = hints.iter().map(|h| h.as_str()).collect();
            let hint_key = format!("hint:{}", goal.id);
            ctx.memory
                .working_put(tenant_id, &hint_key, json!(hint_values), Some(HINT_TTL_MS));
        }

        // 9-11. settle the goal
        if record.cancelled {
            // partial state is written; the job-level retry re-plans
            return Ok(CycleResult {
                status: CycleStatus::Progressed,
                goal_id: Some(goal.id),
                goal_status: Some(GoalStatus::Active),
                progress_delta: 0.0,
                actions_taken: 1,
            });
        }

        if observation.success {
            ctx.goals.reset_failures(goal.id);
            let completed_now = completed_steps + 1;
            let progress = completed_now as f64 / plan.len() as f64;
            let satisfied = observation.score >= ctx.config.cycle.success_threshold
                && progress >= 1.0;
            if completed_now >= plan.len() || satisfied {
                ctx.learning.record(
                    &goal,
                    &plan.goal_class,
                    plan.tool_sequence(),
                    observation.score,
                );
                let marked = ctx.goals.mark(goal.id, GoalStatus::Completed, Some(1.0))?;
                ctx.storage.put_goal(&marked).await?;
                info!(score = observation.score, "goal completed");
                return Ok(self.settled(&marked, 1.0 - prev_progress, 1));
            }
            let marked = ctx.goals.mark(goal.id, GoalStatus::Active, Some(progress))?;
            return Ok(CycleResult {
                status: CycleStatus::Progressed,
                goal_id: Some(marked.id),
                goal_status: Some(marked.status),
                progress_delta: progress - prev_progress,
                actions_taken: 1,
            });
        }

        // failure path
        let error_kind = match record.error_kind {
            Some(ToolErrorKind::Permanent) | Some(ToolErrorKind::Transient) => "tool_permanent",
            Some(ToolErrorKind::User) => "invalid_input",
            None => "unknown",
        };
        let streak = ctx.goals.record_failure(goal.id, error_kind);
        if streak >= ctx.config.cycle.max_failures {
            warn!(streak, "failure budget exhausted, failing goal");
            ctx.learning.record(
                &goal,
                &plan.goal_class,
                plan.tool_sequence(),
                observation.score,
            );
            let marked = ctx.goals.mark(goal.id, GoalStatus::Failed, None)?;
            ctx.storage.put_goal(&marked).await?;
            return Ok(self.settled(&marked, 0.0, 1));
        }
        Ok(CycleResult {
            status: CycleStatus::Progressed,
            goal_id: Some(goal.id),
            goal_status: Some(GoalStatus::Active),
            progress_delta: 0.0,
            actions_taken: 1,
        })
    }

    /// Resolve which goal this cycle works. `Err` carries an
    /// already-settled result for goals that cannot run.
    fn resolve_goal(
        &self,
        tenant_id: &str,
        goal_ref: Option<GoalId>,
    ) -> Result<Option<Goal>, CycleResult> {
        let ctx = &self.ctx;
        match goal_ref {
            None => Ok(ctx.goals.next(Some(tenant_id))),
            Some(id) => {
                let goal = match ctx.goals.get(id) {
                    Some(goal) => goal,
                    None => return Ok(None),
                };
                match goal.status {
                    GoalStatus::Pending | GoalStatus::Active => Ok(Some(goal)),
                    GoalStatus::Blocked => {
                        // a fresh next() releases the goal if its
                        // dependencies have completed since
                        match ctx.goals.next(Some(tenant_id)) {
                            Some(next) if next.id == id => Ok(Some(next)),
                            _ => Err(self.settled(&goal, 0.0, 0)),
                        }
                    }
                    GoalStatus::Paused | GoalStatus::Completed | GoalStatus::Failed => {
                        Err(self.settled(&goal, 0.0, 0))
                    }
                }
            }
        }
    }

    fn settled(&self, goal: &Goal, progress_delta: f64, actions_taken: u32) -> CycleResult {
        CycleResult {
            status: CycleStatus::Settled,
            goal_id: Some(goal.id),
            goal_status: Some(goal.status),
            progress_delta,
            actions_taken,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::EngineBuilder;
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::sync::atomic::{AtomicU32, Ordering};
    use telos_kernel::clock::ManualClock;
    use telos_kernel::config::EngineConfig;
    use telos_kernel::tool::{
        ParamKind, Tool, ToolInput, ToolOutput, ToolSchema,
    };

    struct SearchTool;

    #[async_trait]
    impl Tool for SearchTool {
        fn name(&self) -> &str {
            "search"
        }

        fn description(&self) -> &str {
            "search the corpus"
        }

        fn schema(&self) -> ToolSchema {
            ToolSchema::new().required("query", ParamKind::String)
        }

        async fn execute(&self, _input: ToolInput) -> ToolOutput {
            ToolOutput::success(json!(["result a", "result b"])).with_score(1.0)
        }
    }

    struct SummarizeTool;

    #[async_trait]
    impl Tool for SummarizeTool {
        fn name(&self) -> &str {
            "summarize"
        }

        fn description(&self) -> &str {
            "summarize search results"
        }

        fn schema(&self) -> ToolSchema {
            ToolSchema::new().required("input", ParamKind::String)
        }

        async fn execute(&self, _input: ToolInput) -> ToolOutput {
            ToolOutput::success(json!("summary text")).with_score(1.0)
        }
    }

    struct AlwaysTransient {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Tool for AlwaysTransient {
        fn name(&self) -> &str {
            "search"
        }

        fn description(&self) -> &str {
            "always fails transiently"
        }

        fn schema(&self) -> ToolSchema {
            ToolSchema::new().required("query", ParamKind::String)
        }

        async fn execute(&self, _input: ToolInput) -> ToolOutput {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ToolOutput::failure(ToolErrorKind::Transient, "connection reset")
        }
    }

    fn goal_at(ctx: &WorkerContext, description: &str, priority: f64) -> Goal {
        Goal::new(
            "acme",
            description,
            priority,
            DateTime::from_timestamp_millis(ctx.clock.now_millis() as i64).unwrap(),
        )
        .unwrap()
    }

    fn engine_with_tools() -> (EngineLoop, Arc<WorkerContext>) {
        let clock = Arc::new(ManualClock::at(1_000));
        let mut config = EngineConfig::default();
        config.tool.retry_base_ms = 1;
        config.tool.retry_max_ms = 2;
        let ctx = EngineBuilder::new()
            .with_config(config)
            .with_clock(clock)
            .build();
        ctx.tools.register(Arc::new(SearchTool)).unwrap();
        ctx.tools.register(Arc::new(SummarizeTool)).unwrap();
        (EngineLoop::new(ctx.clone()), ctx)
    }

    #[tokio::test]
    async fn idle_when_no_goal_is_eligible() {
        let (engine, _ctx) = engine_with_tools();
        let result = engine.run_cycle("acme", None, None).await.unwrap();
        assert_eq!(result.status, CycleStatus::Idle);
    }

    #[tokio::test]
    async fn two_cycles_complete_a_two_step_goal() {
        let (engine, ctx) = engine_with_tools();
        let goal = goal_at(&ctx, "summarize topic rust", 0.8)
            .with_constraint("query", json!("rust"));
        let id = ctx.goals.add(goal).unwrap();

        let first = engine.run_cycle("acme", None, None).await.unwrap();
        assert_eq!(first.status, CycleStatus::Progressed);
        assert_eq!(ctx.goals.get(id).unwrap().status, GoalStatus::Active);
        assert!((ctx.goals.get(id).unwrap().progress - 0.5).abs() < 1e-9);

        let second = engine.run_cycle("acme", Some(id), None).await.unwrap();
        assert_eq!(second.status, CycleStatus::Settled);
        assert_eq!(second.goal_status, Some(GoalStatus::Completed));
        assert_eq!(ctx.goals.get(id).unwrap().progress, 1.0);

        // two (action, observation) pairs in episodic memory
        assert_eq!(ctx.memory.episode_count("acme"), 4);
        // the learning store now knows the sequence
        assert_eq!(ctx.learning.len(), 1);
        // write-through persisted the terminal goal
        let stored = ctx.storage.get_goal(id).await.unwrap().unwrap();
        assert_eq!(stored.status, GoalStatus::Completed);
    }

    #[tokio::test]
    async fn unbindable_plan_blocks_the_goal() {
        let (engine, ctx) = engine_with_tools();
        // no "query" constraint anywhere: search cannot bind
        let id = ctx
            .goals
            .add(goal_at(&ctx, "summarize topic rust", 0.8))
            .unwrap();

        let result = engine.run_cycle("acme", None, None).await.unwrap();
        assert_eq!(result.status, CycleStatus::Settled);
        assert_eq!(result.goal_status, Some(GoalStatus::Blocked));
        assert_eq!(ctx.goals.get(id).unwrap().status, GoalStatus::Blocked);
        // no action ran, no observation was appended
        assert_eq!(ctx.memory.episode_count("acme"), 0);
        assert!(ctx.learning.is_empty());
    }

    #[tokio::test]
    async fn repeated_failures_fail_the_goal() {
        let clock = Arc::new(ManualClock::at(1_000));
        let mut config = EngineConfig::default();
        config.tool.retry_base_ms = 1;
        config.tool.retry_max_ms = 2;
        config.cycle.max_failures = 2;
        let ctx = EngineBuilder::new()
            .with_config(config)
            .with_clock(clock)
            .build();
        ctx.tools
            .register(Arc::new(AlwaysTransient {
                calls: AtomicU32::new(0),
            }))
            .unwrap();
        ctx.tools.register(Arc::new(SummarizeTool)).unwrap();
        let engine = EngineLoop::new(ctx.clone());

        let goal = goal_at(&ctx, "summarize topic rust", 0.8)
            .with_constraint("query", json!("rust"));
        let id = ctx.goals.add(goal).unwrap();

        let first = engine.run_cycle("acme", None, None).await.unwrap();
        assert_eq!(first.status, CycleStatus::Progressed);
        assert_eq!(ctx.goals.get(id).unwrap().status, GoalStatus::Active);

        let second = engine.run_cycle("acme", Some(id), None).await.unwrap();
        assert_eq!(second.goal_status, Some(GoalStatus::Failed));
        assert_eq!(
            ctx.goals.get(id).unwrap().last_error.as_deref(),
            Some("tool_permanent")
        );
        // each failed observation was still appended
        assert_eq!(ctx.memory.episode_count("acme"), 4);
    }

    #[tokio::test]
    async fn completed_goal_is_not_rerun() {
        let (engine, ctx) = engine_with_tools();
        let goal = goal_at(&ctx, "summarize topic rust", 0.8)
            .with_constraint("query", json!("rust"));
        let id = ctx.goals.add(goal).unwrap();
        engine.run_cycle("acme", None, None).await.unwrap();
        engine.run_cycle("acme", Some(id), None).await.unwrap();
        assert_eq!(ctx.goals.get(id).unwrap().status, GoalStatus::Completed);

        let again = engine.run_cycle("acme", Some(id), None).await.unwrap();
        assert_eq!(again.status, CycleStatus::Settled);
        assert_eq!(again.actions_taken, 0);
        assert_eq!(ctx.memory.episode_count("acme"), 4);
    }

    #[tokio::test]
    async fn expired_deadline_leaves_goal_active_for_retry() {
        let (engine, ctx) = engine_with_tools();
        let goal = goal_at(&ctx, "summarize topic rust", 0.8)
            .with_constraint("query", json!("rust"));
        let id = ctx.goals.add(goal).unwrap();

        // deadline already in the past: the invocation cancels
        let result = engine.run_cycle("acme", None, Some(500)).await.unwrap();
        assert_eq!(result.status, CycleStatus::Progressed);
        assert_eq!(ctx.goals.get(id).unwrap().status, GoalStatus::Active);
        // the partial observation is still written for diagnosis
        assert_eq!(ctx.memory.episode_count("acme"), 2);
    }
}
