//! Mock tools with scripted outcomes.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use telos_kernel::tool::{
    ParamKind, Tool, ToolErrorKind, ToolInput, ToolMetadata, ToolOutput, ToolSchema,
};

/// A tool whose outcomes are scripted up front.
///
/// Each execution pops the next scripted output; when the script runs
/// dry the tool keeps returning the configured fallback (success by
/// default). All inputs are recorded for assertions.
pub struct MockTool {
    name: String,
    description: String,
    schema: ToolSchema,
    metadata: ToolMetadata,
    script: Mutex<VecDeque<ToolOutput>>,
    fallback: ToolOutput,
    history: Mutex<Vec<ToolInput>>,
}

impl MockTool {
    pub fn new(name: impl Into<String>, schema: ToolSchema) -> Self {
        Self {
            name: name.into(),
            description: "scripted mock tool".into(),
            schema,
            metadata: ToolMetadata::default(),
            script: Mutex::new(VecDeque::new()),
            fallback: ToolOutput::success(json!("ok")).with_score(1.0),
            history: Mutex::new(Vec::new()),
        }
    }

    /// A mock named `name` taking one required string parameter `param`.
    pub fn with_string_param(name: impl Into<String>, param: &str) -> Self {
        Self::new(name, ToolSchema::new().required(param, ParamKind::String))
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: ToolMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Set the outcome returned once the script is exhausted.
    #[must_use]
    pub fn with_fallback(mut self, fallback: ToolOutput) -> Self {
        self.fallback = fallback;
        self
    }

    /// Queue the next scripted outcome.
    pub fn push_outcome(&self, output: ToolOutput) {
        self.script.lock().push_back(output);
    }

    /// Queue `n` transient failures.
    pub fn push_transient_failures(&self, n: usize) {
        for _ in 0..n {
            self.push_outcome(ToolOutput::failure(
                ToolErrorKind::Transient,
                "scripted transient failure",
            ));
        }
    }

    pub fn call_count(&self) -> usize {
        self.history.lock().len()
    }

    pub fn history(&self) -> Vec<ToolInput> {
        self.history.lock().clone()
    }

    pub fn tool_name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl Tool for MockTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn schema(&self) -> ToolSchema {
        self.schema.clone()
    }

    async fn execute(&self, input: ToolInput) -> ToolOutput {
        self.history.lock().push(input);
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }

    fn metadata(&self) -> ToolMetadata {
        self.metadata.clone()
    }
}

/// Convenience: a shared `search` mock with a required `query` param.
pub fn search_mock() -> Arc<MockTool> {
    Arc::new(MockTool::with_string_param("search", "query"))
}

/// Convenience: a shared `summarize` mock with a required `input` param.
pub fn summarize_mock() -> Arc<MockTool> {
    Arc::new(MockTool::with_string_param("summarize", "input"))
}
