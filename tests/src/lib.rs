//! Testing utilities for the Telos goal engine.
//!
//! Mock tools with scripted outcomes and call accounting, plus a small
//! harness for building a fully wired engine on a manual clock.

pub mod tools;

use std::sync::Arc;

use chrono::DateTime;

use telos_kernel::clock::{Clock, ManualClock};
use telos_kernel::config::EngineConfig;
use telos_kernel::goal::Goal;
use telos_runtime::{EngineBuilder, WorkerContext};

/// A wired engine on a [`ManualClock`], ready for integration tests.
pub struct TestEngine {
    pub ctx: Arc<WorkerContext>,
    pub clock: Arc<ManualClock>,
}

impl TestEngine {
    /// Build with the given config; retry delays are shrunk so paused-time
    /// tests do not sleep for real.
    pub fn new(mut config: EngineConfig) -> Self {
        config.tool.retry_base_ms = 1;
        config.tool.retry_max_ms = 4;
        let clock = Arc::new(ManualClock::at(1_000_000));
        let ctx = EngineBuilder::new()
            .with_config(config)
            .with_clock(clock.clone())
            .build();
        Self { ctx, clock }
    }

    pub fn with_defaults() -> Self {
        Self::new(EngineConfig::default())
    }

    /// A pending goal for the tenant, timestamped off the manual clock.
    pub fn goal(&self, tenant: &str, description: &str, priority: f64) -> Goal {
        Goal::new(
            tenant,
            description,
            priority,
            DateTime::from_timestamp_millis(self.clock.now_millis() as i64).unwrap(),
        )
        .unwrap()
    }
}

/// Assert a [`tools::MockTool`] was executed exactly `n` times.
#[macro_export]
macro_rules! assert_tool_called {
    ($tool:expr, $n:expr) => {
        assert_eq!(
            $tool.call_count(),
            $n,
            "expected tool '{}' to be called {} time(s)",
            $tool.tool_name(),
            $n
        );
    };
}
