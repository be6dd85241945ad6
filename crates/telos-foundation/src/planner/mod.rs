//! Hierarchical planner.
//!
//! Decomposes a goal into an ordered [`Plan`] of tool steps. The goal is
//! classified (learning signature → keyword overlap → `generic`), the
//! class template is retrieved, and parameters are bound from goal
//! constraints, then working memory, then class defaults. A learning
//! hint with high confidence replaces the template outright.

pub mod templates;

use std::collections::HashMap;

use tracing::debug;

use telos_kernel::goal::Goal;
use telos_kernel::plan::{Plan, PlannedAction};
use telos_kernel::tool::ToolCatalog;

use crate::learning::RecallResult;
use crate::learning::signature::tokenize;
use crate::memory::ContextSummary;
use templates::{ClassTemplate, TemplateStep, builtin_templates};

/// Signature-match confidence above which the hint decides the class.
const CLASS_HINT_CONFIDENCE: f64 = 0.6;
/// Hint confidence above which the learned sequence replaces the template.
const SEQUENCE_HINT_CONFIDENCE: f64 = 0.7;

/// The planner. Holds the class catalog; stateless across cycles.
pub struct Planner {
    templates: Vec<ClassTemplate>,
}

impl Default for Planner {
    fn default() -> Self {
        Self::new()
    }
}

impl Planner {
    pub fn new() -> Self {
        Self {
            templates: builtin_templates(),
        }
    }

    /// Replace the built-in class catalog.
    pub fn with_templates(templates: Vec<ClassTemplate>) -> Self {
        Self { templates }
    }

    /// Classify a goal into a class name.
    pub fn classify(&self, goal: &Goal, hint: Option<&RecallResult>) -> String {
        if let Some(hint) = hint
            && hint.record.confidence >= CLASS_HINT_CONFIDENCE
        {
            return hint.goal_class.clone();
        }
        let tokens = tokenize(&goal.description);
        let best = self
            .templates
            .iter()
            .filter(|t| !t.keywords.is_empty())
            .map(|t| (t.keyword_hits(&tokens), &t.class))
            .filter(|(hits, _)| *hits > 0)
            .max_by_key(|(hits, _)| *hits);
        match best {
            Some((_, class)) => class.clone(),
            None => "generic".to_string(),
        }
    }

    /// Produce a plan for one cycle of the goal.
    ///
    /// Returns an empty plan with a `block_reason` when nothing can run;
    /// the agent loop marks the goal blocked in response.
    pub fn plan(
        &self,
        goal: &Goal,
        catalog: &dyn ToolCatalog,
        context: &ContextSummary,
        hint: Option<&RecallResult>,
    ) -> Plan {
        let goal_class = self.classify(goal, hint);

        // A confident learned sequence whose tools are all available
        // replaces the template.
        if let Some(hint) = hint
            && hint.record.confidence >= SEQUENCE_HINT_CONFIDENCE
            && hint
                .record
                .action_sequence
                .iter()
                .all(|tool| catalog.contains(tool))
        {
            debug!(
                goal_id = %goal.id,
                confidence = hint.record.confidence,
                "planning from learned sequence"
            );
            let class_template = self.templates.iter().find(|t| t.class == goal_class);
            let mut plan = Plan::new(goal.id, goal_class.clone());
            plan.from_learning = true;
            for tool in &hint.record.action_sequence {
                // reuse the template's derivations for this tool when the
                // class knows it, so learned sequences keep their bindings
                let template_step = class_template
                    .and_then(|t| t.steps.iter().find(|s| &s.tool_name == tool))
                    .cloned()
                    .unwrap_or_else(|| TemplateStep::new(tool.clone(), "learned"));
                let step = self.bind_step(&template_step, goal, catalog, context);
                let clarify = step.needs_clarification;
                plan.steps.push(step);
                if clarify {
                    break;
                }
            }
            return plan;
        }

        let template = match self.templates.iter().find(|t| t.class == goal_class) {
            Some(t) => t,
            None => {
                return Plan::blocked(goal.id, goal_class, "no template for goal class");
            }
        };
        if template.steps.is_empty() {
            return Plan::blocked(goal.id, goal_class, "template has no steps");
        }

        let mut plan = Plan::new(goal.id, goal_class);
        for template_step in &template.steps {
            if !catalog.contains(&template_step.tool_name) {
                if plan.steps.is_empty() {
                    return Plan::blocked(
                        plan.goal_id,
                        plan.goal_class,
                        format!("tool '{}' is not available", template_step.tool_name),
                    );
                }
                // later steps without their tool truncate the plan
                break;
            }
            let step = self.bind_step(template_step, goal, catalog, context);
            let clarify = step.needs_clarification;
            plan.steps.push(step);
            if clarify {
                break;
            }
        }

        // Alternative branches for the first position, for the selector.
        if let Some(first) = template.steps.first() {
            for alt in &first.alt_tools {
                if catalog.contains(alt) {
                    let alt_step = TemplateStep {
                        tool_name: alt.clone(),
                        ..first.clone()
                    };
                    let bound = self.bind_step(&alt_step, goal, catalog, context);
                    if !bound.needs_clarification {
                        plan.alternatives.push(bound);
                    }
                }
            }
        }
        plan
    }

    /// Bind one template step against constraints, working memory, and
    /// class defaults. Marks the step `needs_clarification` when a
    /// required parameter stays unbound.
    fn bind_step(
        &self,
        step: &TemplateStep,
        goal: &Goal,
        catalog: &dyn ToolCatalog,
        context: &ContextSummary,
    ) -> PlannedAction {
        let working = context
            .get("working")
            .and_then(|w| w.as_object())
            .cloned()
            .unwrap_or_default();

        let mut parameters: HashMap<String, serde_json::Value> = HashMap::new();
        let mut unbound: Vec<&str> = Vec::new();

        // every declared schema param is bindable; required ones must bind
        let schema_params: Vec<(String, bool)> = catalog
            .descriptor(&step.tool_name)
            .map(|d| {
                d.schema
                    .params
                    .iter()
                    .map(|p| (p.name.clone(), p.required))
                    .collect()
            })
            .unwrap_or_default();

        let mut wanted: Vec<(String, bool)> = step
            .required_params
            .iter()
            .map(|p| (p.clone(), true))
            .collect();
        for (name, required) in schema_params {
            if !wanted.iter().any(|(n, _)| *n == name) {
                wanted.push((name, required));
            }
        }

        for (param, required) in &wanted {
            let bound = goal
                .constraints
                .get(param)
                .cloned()
                .or_else(|| working.get(param).cloned())
                .or_else(|| step.derivable_params.get(param).cloned());
            match bound {
                Some(value) => {
                    parameters.insert(param.clone(), value);
                }
                None if *required => unbound.push(param),
                None => {}
            }
        }

        let needs_clarification = !unbound.is_empty();
        let rationale = if needs_clarification {
            format!(
                "step '{}' is missing required parameters: {}",
                step.tool_name,
                unbound.join(", ")
            )
        } else {
            format!("class template step for '{}'", step.tool_name)
        };

        let mut action = PlannedAction::new(step.tool_name.clone())
            .with_rationale(rationale)
            .with_expected_outcome(step.expected_outcome.clone());
        action.parameters = parameters;
        action.needs_clarification = needs_clarification;
        action
    }
}
