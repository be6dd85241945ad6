//! Goal-class templates.
//!
//! A template is an ordered list of abstract steps for one goal class.
//! Templates are data: adding a class means adding a value, not a type.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One abstract step of a class template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateStep {
    /// The tool this step invokes.
    pub tool_name: String,
    /// Parameters that must be bound for the step to run.
    pub required_params: Vec<String>,
    /// Parameters derived from earlier steps or defaults when unbound.
    pub derivable_params: HashMap<String, serde_json::Value>,
    /// Interchangeable tools for this position, scored by the selector.
    pub alt_tools: Vec<String>,
    /// Outcome tag the planner expects from this step.
    pub expected_outcome: String,
}

impl TemplateStep {
    pub fn new(tool_name: impl Into<String>, expected_outcome: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            required_params: Vec::new(),
            derivable_params: HashMap::new(),
            alt_tools: Vec::new(),
            expected_outcome: expected_outcome.into(),
        }
    }

    #[must_use]
    pub fn requires(mut self, param: impl Into<String>) -> Self {
        self.required_params.push(param.into());
        self
    }

    #[must_use]
    pub fn derives(mut self, param: impl Into<String>, default: serde_json::Value) -> Self {
        self.derivable_params.insert(param.into(), default);
        self
    }

    #[must_use]
    pub fn alternative(mut self, tool: impl Into<String>) -> Self {
        self.alt_tools.push(tool.into());
        self
    }
}

/// The action template for one goal class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassTemplate {
    pub class: String,
    /// Keywords used by the token-overlap classifier.
    pub keywords: Vec<String>,
    pub steps: Vec<TemplateStep>,
}

impl ClassTemplate {
    /// Number of goal-description tokens that hit this class's keywords.
    pub fn keyword_hits(&self, tokens: &[String]) -> usize {
        tokens
            .iter()
            .filter(|t| self.keywords.iter().any(|k| k == *t))
            .count()
    }
}

/// The built-in class catalog, checked in classifier order.
pub fn builtin_templates() -> Vec<ClassTemplate> {
    vec![
        ClassTemplate {
            class: "research".into(),
            keywords: ["research", "find", "investigate", "search", "discover", "lookup"]
                .map(String::from)
                .to_vec(),
            steps: vec![
                TemplateStep::new("search", "results").requires("query"),
                TemplateStep::new("summarize", "digest")
                    .derives("input", serde_json::json!("@search")),
            ],
        },
        ClassTemplate {
            class: "summarize".into(),
            keywords: ["summarize", "summary", "digest", "condense", "brief"]
                .map(String::from)
                .to_vec(),
            steps: vec![
                TemplateStep::new("search", "results").requires("query"),
                TemplateStep::new("summarize", "digest")
                    .derives("input", serde_json::json!("@search")),
            ],
        },
        ClassTemplate {
            class: "transform".into(),
            keywords: ["transform", "convert", "translate", "rewrite", "format"]
                .map(String::from)
                .to_vec(),
            steps: vec![
                TemplateStep::new("transform", "converted")
                    .requires("input")
                    .derives("format", serde_json::json!("text")),
            ],
        },
        ClassTemplate {
            class: "monitor".into(),
            keywords: ["monitor", "watch", "observe", "track", "poll"]
                .map(String::from)
                .to_vec(),
            steps: vec![
                TemplateStep::new("probe", "sample").requires("target"),
                TemplateStep::new("note", "recorded")
                    .derives("text", serde_json::json!("@probe")),
            ],
        },
        ClassTemplate {
            class: "generic".into(),
            keywords: Vec::new(),
            steps: vec![
                TemplateStep::new("echo", "echoed")
                    .derives("message", serde_json::json!("ack"))
                    .derives("text", serde_json::json!("ack"))
                    .alternative("note"),
            ],
        },
    ]
}
