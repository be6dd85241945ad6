//! Telos runtime — orchestration of the goal engine.
//!
//! Wraps the foundation components with the distributed layer: the
//! priority-laned job queue, the per-`(tenant, goal)` cycle locks, the
//! worker pool, and the service registry. One agent-loop cycle runs as a
//! job consumed by exactly one worker at a time.

pub mod agent_loop;
pub mod builder;
pub mod context;
pub mod locks;
pub mod queue;
pub mod registry;
pub mod worker;

pub use agent_loop::EngineLoop;
pub use builder::EngineBuilder;
pub use context::WorkerContext;
pub use locks::{CycleLockGuard, CycleLockTable};
pub use queue::{JobQueue, QueueMetricsSnapshot};
pub use registry::ServiceRegistry;
pub use worker::{Worker, WorkerHandle};
