//! Storage adapter contract.
//!
//! Durable ownership of goals, jobs, and patterns lives behind this
//! trait. Adapters must provide at-least-once append semantics for
//! episodic rows and a monotonic `(tenant, seq)` pair per tenant.
//! An in-memory implementation lives in `telos-foundation`.

use async_trait::async_trait;

use crate::error::EngineResult;
use crate::goal::{Goal, GoalId};
use crate::job::{Job, JobId};
use crate::learning::{Pattern, PatternId};
use crate::memory::EpisodicEntry;

/// CRUD on durable records plus append-only episodic writes.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn put_goal(&self, goal: &Goal) -> EngineResult<()>;

    async fn get_goal(&self, id: GoalId) -> EngineResult<Option<Goal>>;

    async fn delete_goal(&self, id: GoalId) -> EngineResult<bool>;

    async fn put_job(&self, job: &Job) -> EngineResult<()>;

    async fn get_job(&self, id: JobId) -> EngineResult<Option<Job>>;

    async fn put_pattern(&self, pattern: &Pattern) -> EngineResult<()>;

    async fn delete_pattern(&self, id: PatternId) -> EngineResult<bool>;

    async fn list_patterns(&self) -> EngineResult<Vec<Pattern>>;

    /// Append an episodic row for a tenant. Returns the assigned sequence
    /// number, strictly monotonic per tenant.
    async fn append_episode(&self, tenant_id: &str, entry: &EpisodicEntry) -> EngineResult<u64>;
}
