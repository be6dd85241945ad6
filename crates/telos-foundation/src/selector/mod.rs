//! Experience-driven action selector.
//!
//! Scores candidate actions by goal alignment, historical success,
//! context fit, recency, and expected cost, then feeds observed outcomes
//! back into per-`(tool, goal_class)` statistics. Lost counter updates
//! are tolerable (the EMA absorbs them) but counters never go negative.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use telos_kernel::action::{Action, ActionId};
use telos_kernel::clock::Clock;
use telos_kernel::config::SelectorConfig;
use telos_kernel::error::{EngineError, EngineResult};
use telos_kernel::goal::Goal;
use telos_kernel::observation::Observation;
use telos_kernel::plan::{Plan, PlannedAction};
use telos_kernel::tool::ToolCatalog;

use crate::learning::signature::tokenize;
use crate::memory::ContextSummary;

/// EMA smoothing factor for observed scores.
const EMA_ALPHA: f64 = 0.2;
/// Recency decay constant: a tool used ten minutes ago scores `1/e`.
const RECENCY_TAU_MS: f64 = 600_000.0;
/// How many observed action ids are remembered for idempotence.
const SEEN_CAPACITY: usize = 1_024;

#[derive(Debug, Default, Clone)]
struct ToolStats {
    attempts: u64,
    successes: u64,
    ema_score: f64,
}

impl ToolStats {
    /// Smoothed success rate `(s + 1) / (n + 2)`.
    fn smoothed_success(&self) -> f64 {
        (self.successes as f64 + 1.0) / (self.attempts as f64 + 2.0)
    }
}

/// The action selector.
pub struct ActionSelector {
    weights: SelectorConfig,
    stats: Mutex<HashMap<(String, String), ToolStats>>,
    last_used: Mutex<HashMap<String, u64>>,
    seen: Mutex<(VecDeque<ActionId>, HashSet<ActionId>)>,
    clock: Arc<dyn Clock>,
}

impl ActionSelector {
    pub fn new(weights: SelectorConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            weights,
            stats: Mutex::new(HashMap::new()),
            last_used: Mutex::new(HashMap::new()),
            seen: Mutex::new((VecDeque::new(), HashSet::new())),
            clock,
        }
    }

    /// Pick the best next action from the plan's current position.
    ///
    /// Candidates are the first unfinished step (`completed_steps` steps
    /// are already done) plus the planner's alternative branches for that
    /// position. Ties break toward lower cost, then lexicographic tool
    /// name, for determinism.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidInput`] when the plan has no
    /// remaining steps.
    pub fn select(
        &self,
        goal: &Goal,
        plan: &Plan,
        context: &ContextSummary,
        completed_steps: usize,
        catalog: &dyn ToolCatalog,
    ) -> EngineResult<PlannedAction> {
        let current = plan.steps.get(completed_steps).ok_or_else(|| {
            EngineError::InvalidInput("plan has no remaining steps to select".into())
        })?;

        let mut candidates: Vec<&PlannedAction> = vec![current];
        if completed_steps == 0 {
            candidates.extend(plan.alternatives.iter());
        }

        let mut best: Option<(f64, &PlannedAction)> = None;
        for candidate in candidates {
            let score = self.score(goal, &plan.goal_class, candidate, context, catalog);
            trace!(tool = %candidate.tool_name, score, "scored candidate");
            let replace = match &best {
                None => true,
                Some((best_score, best_action)) => {
                    score > *best_score + f64::EPSILON
                        || ((score - *best_score).abs() <= f64::EPSILON
                            && self.breaks_tie(candidate, best_action, catalog))
                }
            };
            if replace {
                best = Some((score, candidate));
            }
        }
        Ok(best.expect("at least one candidate").1.clone())
    }

    fn breaks_tie(
        &self,
        challenger: &PlannedAction,
        incumbent: &PlannedAction,
        catalog: &dyn ToolCatalog,
    ) -> bool {
        let challenger_cost = self.expected_cost(&challenger.tool_name, catalog);
        let incumbent_cost = self.expected_cost(&incumbent.tool_name, catalog);
        if (challenger_cost - incumbent_cost).abs() > f64::EPSILON {
            return challenger_cost < incumbent_cost;
        }
        challenger.tool_name < incumbent.tool_name
    }

    /// The weighted candidate score.
    pub fn score(
        &self,
        goal: &Goal,
        goal_class: &str,
        action: &PlannedAction,
        context: &ContextSummary,
        catalog: &dyn ToolCatalog,
    ) -> f64 {
        let w = &self.weights;
        w.weight_alignment * self.alignment(goal, action)
            + w.weight_history * self.historical_success(&action.tool_name, goal_class)
            + w.weight_context * self.context_fit(action, context)
            + w.weight_recency * self.recency_bonus(&action.tool_name)
            - w.weight_cost * self.expected_cost(&action.tool_name, catalog)
    }

    /// Token overlap between the goal text and the action's surface.
    fn alignment(&self, goal: &Goal, action: &PlannedAction) -> f64 {
        let goal_tokens: HashSet<String> = tokenize(&goal.description).into_iter().collect();
        if goal_tokens.is_empty() {
            return 0.0;
        }
        let mut action_surface = action.tool_name.clone();
        action_surface.push(' ');
        action_surface.push_str(&action.expected_outcome);
        for value in action.parameters.values() {
            if let Some(s) = value.as_str() {
                action_surface.push(' ');
                action_surface.push_str(s);
            }
        }
        let action_tokens: HashSet<String> = tokenize(&action_surface).into_iter().collect();
        let hits = goal_tokens.intersection(&action_tokens).count();
        hits as f64 / goal_tokens.len() as f64
    }

    /// Smoothed historical success rate for `(tool, goal_class)`.
    fn historical_success(&self, tool_name: &str, goal_class: &str) -> f64 {
        let stats = self.stats.lock();
        stats
            .get(&(tool_name.to_string(), goal_class.to_string()))
            .map(|s| s.smoothed_success())
            // prior of 0.5 for unseen pairs
            .unwrap_or(0.5)
    }

    /// Fraction of the action's parameters that the context can corroborate.
    fn context_fit(&self, action: &PlannedAction, context: &ContextSummary) -> f64 {
        if action.parameters.is_empty() {
            return 0.5;
        }
        let working = context.get("working").and_then(|w| w.as_object());
        let serialized = serde_json::Value::Object(context.clone()).to_string();
        let mut fit = 0usize;
        for (key, value) in &action.parameters {
            let in_working = working.is_some_and(|w| w.contains_key(key));
            let value_seen = value
                .as_str()
                .is_some_and(|s| !s.is_empty() && serialized.contains(s));
            if in_working || value_seen {
                fit += 1;
            }
        }
        fit as f64 / action.parameters.len() as f64
    }

    /// Exponentially decaying bonus for recently exercised tools.
    fn recency_bonus(&self, tool_name: &str) -> f64 {
        let last_used = self.last_used.lock();
        match last_used.get(tool_name) {
            Some(at) => {
                let age = self.clock.now_millis().saturating_sub(*at) as f64;
                (-age / RECENCY_TAU_MS).exp()
            }
            None => 0.0,
        }
    }

    fn expected_cost(&self, tool_name: &str, catalog: &dyn ToolCatalog) -> f64 {
        catalog
            .descriptor(tool_name)
            .map(|d| d.metadata.cost_hint)
            .unwrap_or(0.5)
    }

    /// Fold an observation into the per-`(tool, goal_class)` statistics.
    ///
    /// Idempotent per action id: replaying the same observation is a
    /// no-op.
    pub fn observe(&self, action: &Action, observation: &Observation, goal_class: &str) {
        {
            let mut seen = self.seen.lock();
            if seen.1.contains(&action.id) {
                return;
            }
            seen.1.insert(action.id);
            seen.0.push_back(action.id);
            if seen.0.len() > SEEN_CAPACITY {
                if let Some(evicted) = seen.0.pop_front() {
                    seen.1.remove(&evicted);
                }
            }
        }

        {
            let mut stats = self.stats.lock();
            let entry = stats
                .entry((action.tool_name.clone(), goal_class.to_string()))
                .or_default();
            entry.attempts += 1;
            if observation.success {
                entry.successes += 1;
            }
            entry.ema_score = EMA_ALPHA * observation.score + (1.0 - EMA_ALPHA) * entry.ema_score;
        }

        self.last_used
            .lock()
            .insert(action.tool_name.clone(), self.clock.now_millis());
    }

    /// Observed EMA score for a `(tool, goal_class)` pair, if any.
    pub fn ema_score(&self, tool_name: &str, goal_class: &str) -> Option<f64> {
        self.stats
            .lock()
            .get(&(tool_name.to_string(), goal_class.to_string()))
            .map(|s| s.ema_score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use serde_json::json;
    use telos_kernel::clock::ManualClock;
    use telos_kernel::tool::{ToolDescriptor, ToolMetadata, ToolSchema};

    struct CostCatalog(HashMap<String, f64>);

    impl ToolCatalog for CostCatalog {
        fn contains(&self, name: &str) -> bool {
            self.0.contains_key(name)
        }

        fn descriptor(&self, name: &str) -> Option<ToolDescriptor> {
            self.0.get(name).map(|cost| ToolDescriptor {
                name: name.to_string(),
                description: String::new(),
                schema: ToolSchema::new(),
                metadata: ToolMetadata::new().with_cost_hint(*cost),
            })
        }

        fn list(&self) -> Vec<ToolDescriptor> {
            Vec::new()
        }

        fn list_names(&self) -> Vec<String> {
            self.0.keys().cloned().collect()
        }
    }

    fn catalog() -> CostCatalog {
        let mut costs = HashMap::new();
        costs.insert("search".to_string(), 0.1);
        costs.insert("summarize".to_string(), 0.1);
        costs.insert("echo".to_string(), 0.01);
        CostCatalog(costs)
    }

    fn goal(description: &str) -> Goal {
        Goal::new(
            "acme",
            description,
            0.5,
            DateTime::from_timestamp_millis(0).unwrap(),
        )
        .unwrap()
    }

    fn selector() -> (ActionSelector, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at(0));
        (
            ActionSelector::new(SelectorConfig::default(), clock.clone()),
            clock,
        )
    }

    fn plan_with(goal: &Goal, tools: &[&str]) -> Plan {
        let mut plan = Plan::new(goal.id, "research");
        for tool in tools {
            plan.steps.push(PlannedAction::new(*tool));
        }
        plan
    }

    fn observation(action: &Action, success: bool, score: f64) -> Observation {
        Observation {
            action_id: action.id,
            goal_id: action.goal_id,
            success,
            score,
            anomaly: false,
            signals: Default::default(),
            summary: String::new(),
            latency_ms: 1,
            payload_bytes: 1,
            produced_at: 0,
        }
    }

    #[test]
    fn selects_the_first_unfinished_step() {
        let (selector, _clock) = selector();
        let g = goal("research rust");
        let plan = plan_with(&g, &["search", "summarize"]);
        let context = ContextSummary::new();

        let first = selector.select(&g, &plan, &context, 0, &catalog()).unwrap();
        assert_eq!(first.tool_name, "search");
        let second = selector.select(&g, &plan, &context, 1, &catalog()).unwrap();
        assert_eq!(second.tool_name, "summarize");
    }

    #[test]
    fn exhausted_plan_is_invalid_input() {
        let (selector, _clock) = selector();
        let g = goal("research rust");
        let plan = plan_with(&g, &["search"]);
        let err = selector.select(&g, &plan, &ContextSummary::new(), 1, &catalog());
        assert!(matches!(err, Err(EngineError::InvalidInput(_))));
    }

    #[test]
    fn history_steers_choice_between_alternatives() {
        let (selector, _clock) = selector();
        let g = goal("do something");
        let mut plan = plan_with(&g, &["search"]);
        plan.alternatives.push(PlannedAction::new("summarize"));

        // drive down search's record for this class
        for _ in 0..10 {
            let action = Action::materialize(g.id, &PlannedAction::new("search"), 0);
            selector.observe(&action, &observation(&action, false, -1.0), "research");
        }
        for _ in 0..10 {
            let action = Action::materialize(g.id, &PlannedAction::new("summarize"), 0);
            selector.observe(&action, &observation(&action, true, 1.0), "research");
        }

        let chosen = selector
            .select(&g, &plan, &ContextSummary::new(), 0, &catalog())
            .unwrap();
        assert_eq!(chosen.tool_name, "summarize");
    }

    #[test]
    fn ties_break_by_cost_then_name() {
        let (selector, _clock) = selector();
        // same stats, same alignment: echo is cheaper than search
        let g = goal("unrelated words");
        let mut plan = Plan::new(g.id, "generic");
        plan.steps.push(PlannedAction::new("search"));
        plan.alternatives.push(PlannedAction::new("echo"));

        let chosen = selector
            .select(&g, &plan, &ContextSummary::new(), 0, &catalog())
            .unwrap();
        assert_eq!(chosen.tool_name, "echo");
    }

    #[test]
    fn observe_is_idempotent_per_action_id() {
        let (selector, _clock) = selector();
        let g = goal("research rust");
        let action = Action::materialize(g.id, &PlannedAction::new("search"), 0);
        let obs = observation(&action, true, 1.0);

        selector.observe(&action, &obs, "research");
        let first = selector.ema_score("search", "research").unwrap();
        selector.observe(&action, &obs, "research");
        let second = selector.ema_score("search", "research").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn smoothed_success_has_laplace_prior() {
        let stats = ToolStats::default();
        assert_eq!(stats.smoothed_success(), 0.5);
        let stats = ToolStats {
            attempts: 2,
            successes: 2,
            ema_score: 0.0,
        };
        assert_eq!(stats.smoothed_success(), 0.75);
    }

    #[test]
    fn context_fit_rises_with_corroborated_parameters() {
        let (selector, _clock) = selector();
        let action = PlannedAction::new("search").with_parameter("query", json!("rust async"));
        let empty = ContextSummary::new();
        let mut primed = ContextSummary::new();
        primed.insert("working".into(), json!({"query": "rust async"}));

        assert!(selector.context_fit(&action, &primed) > selector.context_fit(&action, &empty));
    }
}
