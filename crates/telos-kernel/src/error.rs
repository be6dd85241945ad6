//! Engine error taxonomy.
//!
//! Every failure inside the engine is classified into one of these
//! variants. The classification drives control flow: the agent loop
//! converts tool failures into observations, the queue requeues on
//! `LockUnavailable`, and only `Infrastructure` escapes a cycle.

use thiserror::Error;

/// Engine operation result type.
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine error type.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Contract violation: bad parameters, malformed record. Never retried.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Goal or job state machine violation.
    #[error("Invalid transition: from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Tool handler reported a retryable failure or timed out.
    #[error("Transient tool failure: {tool_name}: {message}")]
    ToolTransient { tool_name: String, message: String },

    /// Tool handler reported a non-retryable failure.
    #[error("Permanent tool failure: {tool_name}: {message}")]
    ToolPermanent { tool_name: String, message: String },

    /// No tool registered under the requested name.
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Another worker holds the (tenant, goal) lock.
    #[error("Cycle lock unavailable for tenant {tenant} goal {goal_id}")]
    LockUnavailable { tenant: String, goal_id: String },

    /// A queue lane is saturated. Surfaced to the enqueuer.
    #[error("Queue lane {lane} is full")]
    Busy { lane: String },

    /// Persistence, queue, or registry unreachable. Escapes the cycle.
    #[error("Infrastructure error: {0}")]
    Infrastructure(String),

    /// Cycle aborted by deadline or explicit cancel.
    #[error("Operation was cancelled")]
    Cancelled,

    /// Operation exceeded its deadline.
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO failure.
    #[error("IO error: {0}")]
    Io(String),
}

impl EngineError {
    /// Create a transient tool failure.
    pub fn tool_transient(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolTransient {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Create a permanent tool failure.
    pub fn tool_permanent(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolPermanent {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Create a state transition error.
    pub fn invalid_transition(from: impl std::fmt::Debug, to: impl std::fmt::Debug) -> Self {
        Self::InvalidTransition {
            from: format!("{:?}", from),
            to: format!("{:?}", to),
        }
    }

    /// Whether retrying the failed operation may succeed.
    ///
    /// `Busy` and `LockUnavailable` are retryable by the *caller* with
    /// backoff; `ToolTransient` is retryable by the tool registry under
    /// its own policy.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ToolTransient { .. } | Self::LockUnavailable { .. } | Self::Busy { .. }
        )
    }

    /// Whether the failure is final: no retry at any level can change
    /// the outcome. Terminal errors fail their job outright instead of
    /// riding the visibility lease back into the queue.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput(_)
                | Self::InvalidTransition { .. }
                | Self::ToolPermanent { .. }
                | Self::ToolNotFound(_)
                | Self::Serialization(_)
                | Self::Cancelled
        )
    }

    /// Whether the error counts against a job's attempt budget.
    ///
    /// Lock contention and cancellation are scheduling artifacts, not
    /// execution failures.
    pub fn counts_as_attempt(&self) -> bool {
        !matches!(self, Self::LockUnavailable { .. } | Self::Cancelled)
    }

    /// Short stable name used in observation signals and job error fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::ToolTransient { .. } => "tool_transient",
            Self::ToolPermanent { .. } => "tool_permanent",
            Self::ToolNotFound(_) => "tool_not_found",
            Self::LockUnavailable { .. } => "lock_unavailable",
            Self::Busy { .. } => "busy",
            Self::Infrastructure(_) => "infrastructure",
            Self::Cancelled => "cancelled",
            Self::Timeout { .. } => "timeout",
            Self::Serialization(_) => "serialization",
            Self::Io(_) => "io",
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io(err.to_string())
    }
}
