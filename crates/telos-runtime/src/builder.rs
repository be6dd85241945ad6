//! Engine builder — explicit wiring, fluent API.

use std::sync::Arc;

use telos_foundation::{
    ActionSelector, GoalManager, InMemoryStorage, LearningStore, MemoryStore, ObservationAnalyzer,
    Planner, ToolRegistry,
};
use telos_kernel::clock::{Clock, SystemClock};
use telos_kernel::config::EngineConfig;
use telos_kernel::memory::Memory;
use telos_kernel::storage::Storage;
use telos_kernel::tool::Tool;

use crate::context::WorkerContext;
use crate::locks::CycleLockTable;
use crate::queue::JobQueue;
use crate::registry::ServiceRegistry;

/// Builds a fully wired [`WorkerContext`].
///
/// # Example
///
/// ```rust,ignore
/// let ctx = EngineBuilder::new()
///     .with_config(EngineConfig::from_file("telos.toml")?)
///     .register_tool(Arc::new(SearchTool))
///     .build();
/// let worker = Worker::spawn(ctx, "worker-1");
/// ```
pub struct EngineBuilder {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    storage: Option<Arc<dyn Storage>>,
    tools: Vec<Arc<dyn Tool>>,
    planner: Option<Planner>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            clock: Arc::new(SystemClock),
            storage: None,
            tools: Vec::new(),
            planner: None,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Queue a tool for registration at build time. Duplicate names are
    /// reported by [`build`](Self::build) via a warning and skipped.
    #[must_use]
    pub fn register_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    #[must_use]
    pub fn with_planner(mut self, planner: Planner) -> Self {
        self.planner = Some(planner);
        self
    }

    /// Wire everything into a shared context.
    pub fn build(self) -> Arc<WorkerContext> {
        let config = self.config;
        let clock = self.clock;

        let queue = Arc::new(JobQueue::new(config.queue.clone(), clock.clone()));
        let locks = Arc::new(CycleLockTable::new(
            config.queue.visibility_timeout_ms,
            clock.clone(),
        ));
        let services = Arc::new(ServiceRegistry::new(config.registry_ttl_ms(), clock.clone()));
        let goals = Arc::new(GoalManager::new(clock.clone()));
        let memory: Arc<dyn Memory> =
            Arc::new(MemoryStore::new(config.memory.clone(), clock.clone()));
        let learning = Arc::new(LearningStore::new(config.learning.clone(), clock.clone()));
        let tools = Arc::new(ToolRegistry::new(config.tool.clone(), clock.clone()));
        for tool in self.tools {
            if let Err(e) = tools.register(tool) {
                tracing::warn!(error = %e, "skipping tool registration");
            }
        }
        let planner = Arc::new(self.planner.unwrap_or_default());
        let selector = Arc::new(ActionSelector::new(config.selector.clone(), clock.clone()));
        let analyzer = Arc::new(ObservationAnalyzer::new(clock.clone()));
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(InMemoryStorage::new()));

        Arc::new(WorkerContext {
            config,
            clock,
            queue,
            locks,
            services,
            goals,
            memory,
            learning,
            tools,
            planner,
            selector,
            analyzer,
            storage,
        })
    }
}
