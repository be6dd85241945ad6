//! Builtin tools.
//!
//! Pure, idempotent tools that ship with the engine. Real deployments
//! register their own handlers next to these.

use async_trait::async_trait;
use serde_json::json;

use telos_kernel::tool::{ParamKind, Tool, ToolInput, ToolMetadata, ToolOutput, ToolSchema};

/// Returns its input message unchanged.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Return the given message unchanged"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new().required("message", ParamKind::String)
    }

    async fn execute(&self, input: ToolInput) -> ToolOutput {
        let message = input.get_str("message").unwrap_or_default();
        let non_empty = if message.is_empty() { 0.0 } else { 1.0 };
        ToolOutput::success(json!({ "message": message }))
            .with_score(1.0)
            .with_signal("non_empty", non_empty)
    }

    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new().with_category("builtin").with_cost_hint(0.01)
    }
}

/// Records a free-form note, echoing the text it stored.
pub struct NoteTool;

#[async_trait]
impl Tool for NoteTool {
    fn name(&self) -> &str {
        "note"
    }

    fn description(&self) -> &str {
        "Record a note for later context"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new()
            .required("text", ParamKind::String)
            .optional("tag", ParamKind::String)
    }

    async fn execute(&self, input: ToolInput) -> ToolOutput {
        let text = input.get_str("text").unwrap_or_default();
        let tag = input.get_str("tag").unwrap_or("note");
        ToolOutput::success(json!({ "noted": text, "tag": tag })).with_score(0.5)
    }

    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new().with_category("builtin").with_cost_hint(0.01)
    }
}
