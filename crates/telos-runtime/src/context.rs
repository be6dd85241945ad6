//! Per-worker context: every component handle in one place.
//!
//! No module-level mutable state anywhere in the engine. A worker is
//! handed one [`WorkerContext`] at boot and reaches everything through
//! it; cross-cutting concerns travel with the context, not globals.

use std::sync::Arc;

use telos_foundation::{
    ActionSelector, GoalManager, LearningStore, ObservationAnalyzer, Planner, ToolRegistry,
};
use telos_kernel::clock::Clock;
use telos_kernel::config::EngineConfig;
use telos_kernel::memory::Memory;
use telos_kernel::storage::Storage;

use crate::locks::CycleLockTable;
use crate::queue::JobQueue;
use crate::registry::ServiceRegistry;

/// Shared handles for one worker process. Cheap to clone via [`Arc`];
/// construction happens once in [`EngineBuilder`](crate::EngineBuilder).
pub struct WorkerContext {
    pub config: EngineConfig,
    pub clock: Arc<dyn Clock>,
    pub queue: Arc<JobQueue>,
    pub locks: Arc<CycleLockTable>,
    pub services: Arc<ServiceRegistry>,
    pub goals: Arc<GoalManager>,
    pub memory: Arc<dyn Memory>,
    pub learning: Arc<LearningStore>,
    pub tools: Arc<ToolRegistry>,
    pub planner: Arc<Planner>,
    pub selector: Arc<ActionSelector>,
    pub analyzer: Arc<ObservationAnalyzer>,
    pub storage: Arc<dyn Storage>,
}
