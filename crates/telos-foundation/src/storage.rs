//! In-memory storage adapter.
//!
//! Backs the kernel [`Storage`] contract for tests and single-process
//! deployments. Database adapters implement the same trait out of tree.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use telos_kernel::error::EngineResult;
use telos_kernel::goal::{Goal, GoalId};
use telos_kernel::job::{Job, JobId};
use telos_kernel::learning::{Pattern, PatternId};
use telos_kernel::memory::EpisodicEntry;
use telos_kernel::storage::Storage;

/// Non-durable [`Storage`] backed by maps.
#[derive(Default)]
pub struct InMemoryStorage {
    goals: RwLock<HashMap<GoalId, Goal>>,
    jobs: RwLock<HashMap<JobId, Job>>,
    patterns: RwLock<HashMap<PatternId, Pattern>>,
    episodes: RwLock<HashMap<String, Vec<EpisodicEntry>>>,
    sequences: RwLock<HashMap<String, u64>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Episodes stored for a tenant, in append order.
    pub async fn episodes(&self, tenant_id: &str) -> Vec<EpisodicEntry> {
        self.episodes
            .read()
            .await
            .get(tenant_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn put_goal(&self, goal: &Goal) -> EngineResult<()> {
        self.goals.write().await.insert(goal.id, goal.clone());
        Ok(())
    }

    async fn get_goal(&self, id: GoalId) -> EngineResult<Option<Goal>> {
        Ok(self.goals.read().await.get(&id).cloned())
    }

    async fn delete_goal(&self, id: GoalId) -> EngineResult<bool> {
        Ok(self.goals.write().await.remove(&id).is_some())
    }

    async fn put_job(&self, job: &Job) -> EngineResult<()> {
        self.jobs.write().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, id: JobId) -> EngineResult<Option<Job>> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn put_pattern(&self, pattern: &Pattern) -> EngineResult<()> {
        self.patterns
            .write()
            .await
            .insert(pattern.pattern_id, pattern.clone());
        Ok(())
    }

    async fn delete_pattern(&self, id: PatternId) -> EngineResult<bool> {
        Ok(self.patterns.write().await.remove(&id).is_some())
    }

    async fn list_patterns(&self) -> EngineResult<Vec<Pattern>> {
        Ok(self.patterns.read().await.values().cloned().collect())
    }

    async fn append_episode(&self, tenant_id: &str, entry: &EpisodicEntry) -> EngineResult<u64> {
        let mut sequences = self.sequences.write().await;
        let seq = sequences.entry(tenant_id.to_string()).or_insert(0);
        let assigned = *seq;
        *seq += 1;
        drop(sequences);

        let mut stored = entry.clone();
        stored.seq = assigned;
        self.episodes
            .write()
            .await
            .entry(tenant_id.to_string())
            .or_default()
            .push(stored);
        Ok(assigned)
    }
}
