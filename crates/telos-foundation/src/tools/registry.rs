//! Tool registry — validation, timeout, retry, and observation capture.
//!
//! The registry is the single choke point for side effects: every tool
//! invocation passes through schema validation, a per-tool timeout, and
//! the retry policy, and leaves behind an [`InvocationRecord`] plus
//! per-tool metrics.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, warn};

use telos_kernel::clock::Clock;
use telos_kernel::config::ToolConfig;
use telos_kernel::error::{EngineError, EngineResult};
use telos_kernel::retry::RetryConfig;
use telos_kernel::tool::{
    InvocationRecord, Tool, ToolCatalog, ToolDescriptor, ToolErrorKind, ToolInput,
};

use crate::retry::retry_with_policy;

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Per-tool invocation counters.
#[derive(Debug, Default)]
pub struct InvocationMetrics {
    invocations: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    retries: AtomicU64,
    cumulative_latency_ms: AtomicU64,
}

/// Point-in-time view of [`InvocationMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub invocations: u64,
    pub successes: u64,
    pub failures: u64,
    pub retries: u64,
    pub cumulative_latency_ms: u64,
}

impl InvocationMetrics {
    fn record(&self, record: &InvocationRecord) {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        if record.success {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        self.retries
            .fetch_add(u64::from(record.attempts.saturating_sub(1)), Ordering::Relaxed);
        self.cumulative_latency_ms
            .fetch_add(record.latency_ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            invocations: self.invocations.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            cumulative_latency_ms: self.cumulative_latency_ms.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

struct RegisteredTool {
    tool: Arc<dyn Tool>,
    retry: RetryConfig,
    metrics: Arc<InvocationMetrics>,
}

/// The tool registry.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, RegisteredTool>>,
    config: ToolConfig,
    clock: Arc<dyn Clock>,
}

impl ToolRegistry {
    pub fn new(config: ToolConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            config,
            clock,
        }
    }

    /// Register a tool under the default retry policy: exponential backoff
    /// for idempotent tools, a single attempt otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidInput`] if the name is already taken.
    pub fn register(&self, tool: Arc<dyn Tool>) -> EngineResult<()> {
        let retry = if tool.metadata().idempotent {
            RetryConfig::exponential(
                self.config.max_attempts as usize,
                self.config.retry_base_ms,
                self.config.retry_max_ms,
            )
        } else {
            RetryConfig::no_retry()
        };
        self.register_with_retry(tool, retry)
    }

    /// Register a tool with an explicit retry policy.
    pub fn register_with_retry(&self, tool: Arc<dyn Tool>, retry: RetryConfig) -> EngineResult<()> {
        let mut retry = retry;
        if !tool.metadata().idempotent {
            // non-idempotent tools are never retried, whatever the policy says
            retry = RetryConfig::no_retry();
        }
        let name = tool.name().to_string();
        let mut tools = self.tools.write();
        if tools.contains_key(&name) {
            return Err(EngineError::InvalidInput(format!(
                "tool '{name}' is already registered"
            )));
        }
        tools.insert(
            name,
            RegisteredTool {
                tool,
                retry,
                metrics: Arc::new(InvocationMetrics::default()),
            },
        );
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.tools.write().remove(name).is_some()
    }

    pub fn metrics(&self, name: &str) -> Option<Arc<InvocationMetrics>> {
        self.tools.read().get(name).map(|r| r.metrics.clone())
    }

    /// Invoke a tool with validated parameters.
    ///
    /// `deadline_ms` is the epoch-millisecond cancellation deadline of the
    /// enclosing cycle, if any. Transient failures and timeouts are retried
    /// under the tool's policy; permanent failures return immediately.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ToolNotFound`] for unknown names and
    /// [`EngineError::InvalidInput`] when parameters fail the schema.
    /// Handler failures are *not* errors: they come back inside the
    /// [`InvocationRecord`].
    pub async fn invoke(
        &self,
        name: &str,
        params: &HashMap<String, serde_json::Value>,
        deadline_ms: Option<u64>,
    ) -> EngineResult<InvocationRecord> {
        let (tool, retry, metrics) = {
            let tools = self.tools.read();
            let registered = tools
                .get(name)
                .ok_or_else(|| EngineError::ToolNotFound(name.to_string()))?;
            (
                registered.tool.clone(),
                registered.retry.clone(),
                registered.metrics.clone(),
            )
        };

        tool.schema().validate(params)?;
        let input = ToolInput::new(params.clone());
        let started = Instant::now();

        // One attempt: run the handler under the remaining time budget
        // and classify the outcome. Transient failures and plain
        // timeouts surface as retryable errors for the driver; a lapsed
        // deadline surfaces as `Cancelled` and stops retrying.
        let (result, attempts) = retry_with_policy(&retry, |attempt| {
            let tool = tool.clone();
            let input = input.clone();
            async move {
                let now = self.clock.now_millis();
                let budget = match deadline_ms {
                    Some(deadline) if now >= deadline => return Err(EngineError::Cancelled),
                    Some(deadline) => Duration::from_millis(
                        (deadline - now + self.config.cancel_grace_ms)
                            .min(self.config.default_timeout_ms),
                    ),
                    None => Duration::from_millis(self.config.default_timeout_ms),
                };
                match tokio::time::timeout(budget, tool.execute(input)).await {
                    Ok(output) => match output.error.as_ref().map(|e| e.kind) {
                        Some(ToolErrorKind::Transient) if !output.success => {
                            debug!(tool = name, attempt, "transient failure");
                            let message = output
                                .error
                                .map(|e| e.message)
                                .unwrap_or_else(|| "transient failure".into());
                            Err(EngineError::tool_transient(name, message))
                        }
                        _ => Ok(output),
                    },
                    Err(_) => {
                        if deadline_ms.is_some_and(|d| self.clock.now_millis() >= d) {
                            warn!(tool = name, "invocation abandoned at deadline");
                            Err(EngineError::Cancelled)
                        } else {
                            debug!(tool = name, attempt, "timed out");
                            Err(EngineError::tool_transient(
                                name,
                                format!("timed out after {}ms", budget.as_millis()),
                            ))
                        }
                    }
                }
            }
        })
        .await;

        let latency_ms = started.elapsed().as_millis() as u64;
        let record = match result {
            Ok(output) => InvocationRecord {
                tool_name: name.to_string(),
                success: output.success,
                score: output.score,
                signals: output.signals.clone(),
                payload_bytes: output.payload_bytes(),
                payload: output.payload,
                error_kind: output.error.as_ref().map(|e| e.kind),
                fallback_used: output.success && attempts > 1,
                error_message: output.error.map(|e| e.message),
                latency_ms,
                attempts,
                cancelled: false,
            },
            Err(EngineError::Cancelled) => InvocationRecord {
                tool_name: name.to_string(),
                success: false,
                score: None,
                signals: HashMap::new(),
                payload: serde_json::Value::Null,
                error_kind: None,
                error_message: Some("cancelled by deadline".into()),
                latency_ms,
                payload_bytes: 0,
                attempts,
                fallback_used: false,
                cancelled: true,
            },
            Err(EngineError::ToolTransient { message, .. }) => InvocationRecord {
                tool_name: name.to_string(),
                success: false,
                score: None,
                signals: HashMap::new(),
                payload: serde_json::Value::Null,
                error_kind: Some(ToolErrorKind::Transient),
                error_message: Some(message),
                latency_ms,
                payload_bytes: 0,
                attempts,
                fallback_used: false,
                cancelled: false,
            },
            Err(e) => return Err(e),
        };
        metrics.record(&record);
        Ok(record)
    }
}

impl ToolCatalog for ToolRegistry {
    fn contains(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    fn descriptor(&self, name: &str) -> Option<ToolDescriptor> {
        self.tools
            .read()
            .get(name)
            .map(|r| ToolDescriptor::from_tool(r.tool.as_ref()))
    }

    fn list(&self) -> Vec<ToolDescriptor> {
        self.tools
            .read()
            .values()
            .map(|r| ToolDescriptor::from_tool(r.tool.as_ref()))
            .collect()
    }

    fn list_names(&self) -> Vec<String> {
        self.tools.read().keys().cloned().collect()
    }
}
