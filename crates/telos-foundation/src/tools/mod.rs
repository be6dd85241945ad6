//! Tool registration and invocation.

mod builtin;
mod registry;

pub use builtin::{EchoTool, NoteTool};
pub use registry::{InvocationMetrics, MetricsSnapshot, ToolRegistry};
