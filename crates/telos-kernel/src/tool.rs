//! Tool contract — the only place side effects occur in the engine.
//!
//! A tool is a named handler plus a declared parameter schema and
//! metadata. Handlers must be pure with respect to the engine's in-memory
//! state; everything they learn flows back through the returned
//! [`ToolOutput`], which the observation analyzer turns into an
//! [`Observation`](crate::observation::Observation).
//!
//! Trait definitions live here; the concrete registry (validation,
//! timeout, retry, metrics capture) lives in `telos-foundation`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};

// ---------------------------------------------------------------------------
// Parameter schema
// ---------------------------------------------------------------------------

/// The JSON type a parameter must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    String,
    Number,
    Bool,
    Object,
    Array,
}

impl ParamKind {
    fn matches(&self, value: &serde_json::Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Bool => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }
}

/// Declaration of a single tool parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
}

/// The declared parameter schema of a tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolSchema {
    pub params: Vec<ParamSpec>,
}

impl ToolSchema {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn required(mut self, name: impl Into<String>, kind: ParamKind) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            kind,
            required: true,
        });
        self
    }

    #[must_use]
    pub fn optional(mut self, name: impl Into<String>, kind: ParamKind) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            kind,
            required: false,
        });
        self
    }

    /// Names of all required parameters.
    pub fn required_params(&self) -> impl Iterator<Item = &str> {
        self.params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
    }

    /// Validate an argument map against this schema.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidInput`] on a missing required
    /// parameter or a type mismatch.
    pub fn validate(&self, args: &HashMap<String, serde_json::Value>) -> EngineResult<()> {
        for spec in &self.params {
            match args.get(&spec.name) {
                Some(value) => {
                    if !spec.kind.matches(value) {
                        return Err(EngineError::InvalidInput(format!(
                            "parameter '{}' has wrong type, expected {:?}",
                            spec.name, spec.kind
                        )));
                    }
                }
                None if spec.required => {
                    return Err(EngineError::InvalidInput(format!(
                        "missing required parameter '{}'",
                        spec.name
                    )));
                }
                None => {}
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tool input / output
// ---------------------------------------------------------------------------

/// Validated arguments handed to a tool handler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolInput {
    pub arguments: HashMap<String, serde_json::Value>,
}

impl ToolInput {
    pub fn new(arguments: HashMap<String, serde_json::Value>) -> Self {
        Self { arguments }
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.arguments.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(|v| v.as_str())
    }

    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.arguments.get(key).and_then(|v| v.as_f64())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.arguments.get(key).and_then(|v| v.as_bool())
    }
}

impl From<HashMap<String, serde_json::Value>> for ToolInput {
    fn from(arguments: HashMap<String, serde_json::Value>) -> Self {
        Self::new(arguments)
    }
}

/// Failure classification a handler may attach to its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// Network-like failure; the registry retries under the tool policy.
    Transient,
    /// Validation or permission failure; never retried.
    Permanent,
    /// The user's request itself was unsatisfiable. Not an anomaly.
    User,
}

/// Structured error a handler reports inside its output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub message: String,
}

/// What a tool handler returns.
///
/// `score`, when present, must lie in `[-1, 1]`; when absent the analyzer
/// derives `+1` / `-1` from `success`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub score: Option<f64>,
    /// Named numeric signals merged into the resulting observation.
    pub signals: HashMap<String, f64>,
    /// The result payload.
    pub payload: serde_json::Value,
    pub error: Option<ToolError>,
}

impl ToolOutput {
    /// A successful output carrying the given payload.
    pub fn success(payload: serde_json::Value) -> Self {
        Self {
            success: true,
            score: None,
            signals: HashMap::new(),
            payload,
            error: None,
        }
    }

    /// A failed output with the given classification.
    pub fn failure(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            score: None,
            signals: HashMap::new(),
            payload: serde_json::Value::Null,
            error: Some(ToolError {
                kind,
                message: message.into(),
            }),
        }
    }

    #[must_use]
    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score.clamp(-1.0, 1.0));
        self
    }

    #[must_use]
    pub fn with_signal(mut self, key: impl Into<String>, value: f64) -> Self {
        self.signals.insert(key.into(), value);
        self
    }

    /// Byte size of the serialized payload.
    pub fn payload_bytes(&self) -> u64 {
        self.payload.to_string().len() as u64
    }
}

// ---------------------------------------------------------------------------
// Tool metadata and descriptor
// ---------------------------------------------------------------------------

/// Static properties of a tool consulted by the registry and selector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub category: Option<String>,
    pub tags: Vec<String>,
    /// Non-idempotent tools are never retried, regardless of policy.
    pub idempotent: bool,
    /// Relative invocation cost in `[0, 1]`, consulted by the selector.
    pub cost_hint: f64,
    pub requires_network: bool,
}

impl Default for ToolMetadata {
    fn default() -> Self {
        Self {
            category: None,
            tags: Vec::new(),
            idempotent: true,
            cost_hint: 0.1,
            requires_network: false,
        }
    }
}

impl ToolMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    #[must_use]
    pub fn non_idempotent(mut self) -> Self {
        self.idempotent = false;
        self
    }

    #[must_use]
    pub fn with_cost_hint(mut self, cost: f64) -> Self {
        self.cost_hint = cost.clamp(0.0, 1.0);
        self
    }

    #[must_use]
    pub fn needs_network(mut self) -> Self {
        self.requires_network = true;
        self
    }
}

/// Read-only summary of a registered tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub schema: ToolSchema,
    pub metadata: ToolMetadata,
}

impl ToolDescriptor {
    pub fn from_tool(tool: &dyn Tool) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            schema: tool.schema(),
            metadata: tool.metadata(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tool trait
// ---------------------------------------------------------------------------

/// The tool handler contract.
///
/// Handlers must be idempotent under retries with the same parameters, or
/// mark themselves non-idempotent via [`ToolMetadata`] to disable retry.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name.
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// Declared parameter schema, validated before every invocation.
    fn schema(&self) -> ToolSchema;

    /// Execute with validated input. Failures are expressed in the output,
    /// not by panicking.
    async fn execute(&self, input: ToolInput) -> ToolOutput;

    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::default()
    }
}

/// Read-only view over registered tools, consumed by the planner and the
/// learning store (stale-tool filtering at recall).
pub trait ToolCatalog: Send + Sync {
    fn contains(&self, name: &str) -> bool;

    fn descriptor(&self, name: &str) -> Option<ToolDescriptor>;

    fn list(&self) -> Vec<ToolDescriptor>;

    fn list_names(&self) -> Vec<String>;
}

impl<T: ToolCatalog + ?Sized> ToolCatalog for Arc<T> {
    fn contains(&self, name: &str) -> bool {
        (**self).contains(name)
    }

    fn descriptor(&self, name: &str) -> Option<ToolDescriptor> {
        (**self).descriptor(name)
    }

    fn list(&self) -> Vec<ToolDescriptor> {
        (**self).list()
    }

    fn list_names(&self) -> Vec<String> {
        (**self).list_names()
    }
}

// ---------------------------------------------------------------------------
// Invocation record
// ---------------------------------------------------------------------------

/// Raw capture of one registry invocation, before analysis.
///
/// The registry measures; the observation analyzer classifies. Exactly one
/// [`Observation`](crate::observation::Observation) is derived from each
/// record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationRecord {
    pub tool_name: String,
    pub success: bool,
    pub score: Option<f64>,
    pub signals: HashMap<String, f64>,
    pub payload: serde_json::Value,
    pub error_kind: Option<ToolErrorKind>,
    pub error_message: Option<String>,
    pub latency_ms: u64,
    pub payload_bytes: u64,
    /// Total attempts made, including the first.
    pub attempts: u32,
    /// True when success came from a retry rather than the first attempt.
    pub fallback_used: bool,
    /// True when the invocation was abandoned by deadline or cancel.
    pub cancelled: bool,
}
