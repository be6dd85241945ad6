//! Tenant-sharded memory facade and context summaries.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use telos_kernel::action::Action;
use telos_kernel::clock::Clock;
use telos_kernel::config::MemoryConfig;
use telos_kernel::goal::Goal;
use telos_kernel::memory::{ContextSummary, EpisodeKind, Memory};
use telos_kernel::observation::Observation;

use super::episodic::EpisodicMemory;
use super::working::WorkingMemory;

const DAY_MS: u64 = 86_400_000;

struct TenantShard {
    working: WorkingMemory,
    episodic: EpisodicMemory,
}

/// The [`Memory`] implementation: working + episodic views per tenant.
///
/// Shards are created on first touch. Within a tenant all writes are
/// serialized by the shard mutex; across tenants writes are independent.
pub struct MemoryStore {
    shards: Mutex<HashMap<String, Arc<Mutex<TenantShard>>>>,
    config: MemoryConfig,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(config: MemoryConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            shards: Mutex::new(HashMap::new()),
            config,
            clock,
        }
    }

    fn shard(&self, tenant_id: &str) -> Arc<Mutex<TenantShard>> {
        let mut shards = self.shards.lock();
        shards
            .entry(tenant_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(TenantShard {
                    working: WorkingMemory::new(self.config.working_capacity),
                    episodic: EpisodicMemory::new(
                        u64::from(self.config.episodic_max_age_days) * DAY_MS,
                        self.config.episodic_max_bytes as usize,
                    ),
                }))
            })
            .clone()
    }

    // -- working view ------------------------------------------------------

    pub fn working_put(
        &self,
        tenant_id: &str,
        key: impl Into<String>,
        value: serde_json::Value,
        ttl_ms: Option<u64>,
    ) {
        let now = self.clock.now_millis();
        let shard = self.shard(tenant_id);
        let mut shard = shard.lock();
        shard.working.put(key, value, ttl_ms, now);
    }

    pub fn working_get(&self, tenant_id: &str, key: &str) -> Option<serde_json::Value> {
        let now = self.clock.now_millis();
        let shard = self.shard(tenant_id);
        let mut shard = shard.lock();
        shard.working.get(key, now)
    }

    // -- episodic view -----------------------------------------------------

    /// Append a completed `(action, observation)` pair. Returns the pair of
    /// assigned sequence numbers; the observation immediately follows the
    /// action in append order.
    pub fn append_cycle(
        &self,
        tenant_id: &str,
        action: &Action,
        observation: &Observation,
    ) -> (u64, u64) {
        let now = self.clock.now_millis();
        let shard = self.shard(tenant_id);
        let mut shard = shard.lock();
        let action_seq = shard.episodic.append(
            EpisodeKind::Action,
            serde_json::to_value(action).unwrap_or(serde_json::Value::Null),
            now,
        );
        let obs_seq = shard.episodic.append(
            EpisodeKind::Observation,
            serde_json::to_value(observation).unwrap_or(serde_json::Value::Null),
            now,
        );
        (action_seq, obs_seq)
    }

    pub fn append_note(&self, tenant_id: &str, note: serde_json::Value) -> u64 {
        let now = self.clock.now_millis();
        let shard = self.shard(tenant_id);
        let mut shard = shard.lock();
        shard.episodic.append(EpisodeKind::Note, note, now)
    }

    pub fn episode_count(&self, tenant_id: &str) -> usize {
        let shard = self.shard(tenant_id);
        let shard = shard.lock();
        shard.episodic.len()
    }

    // -- context assembly --------------------------------------------------

    /// Assemble the cycle context for a goal: the last `k` episodic entries
    /// plus working entries whose keys match the goal's constraint keys,
    /// serialized into a map bounded to `context_max_bytes`.
    ///
    /// Deterministic given the same inputs: episodic entries are ordered by
    /// sequence and dropped oldest-first when over the byte bound.
    pub fn context_summary(&self, goal: &Goal) -> ContextSummary {
        let now = self.clock.now_millis();
        let shard = self.shard(&goal.tenant_id);
        let shard = shard.lock();

        let mut working = serde_json::Map::new();
        let mut keys: Vec<&String> = goal.constraints.keys().collect();
        keys.sort();
        for key in keys {
            if let Some(value) = shard.working.peek(key, now) {
                working.insert(key.clone(), value.clone());
            }
        }

        let mut episodes: Vec<serde_json::Value> = shard
            .episodic
            .recent(self.config.context_entries)
            .iter()
            .map(|e| {
                json!({
                    "seq": e.seq,
                    "kind": e.kind,
                    "payload": e.payload,
                })
            })
            .collect();

        let mut summary = ContextSummary::new();
        summary.insert("working".into(), serde_json::Value::Object(working));
        summary.insert("episodes".into(), json!(episodes.clone()));

        // Enforce the byte bound by dropping the oldest episodes first.
        while serde_json::Value::Object(summary.clone()).to_string().len()
            > self.config.context_max_bytes
            && !episodes.is_empty()
        {
            episodes.remove(0);
            summary.insert("episodes".into(), json!(episodes.clone()));
        }
        summary
    }
}

impl Memory for MemoryStore {
    fn working_put(
        &self,
        tenant_id: &str,
        key: &str,
        value: serde_json::Value,
        ttl_ms: Option<u64>,
    ) {
        MemoryStore::working_put(self, tenant_id, key, value, ttl_ms);
    }

    fn working_get(&self, tenant_id: &str, key: &str) -> Option<serde_json::Value> {
        MemoryStore::working_get(self, tenant_id, key)
    }

    fn append_cycle(
        &self,
        tenant_id: &str,
        action: &Action,
        observation: &Observation,
    ) -> (u64, u64) {
        MemoryStore::append_cycle(self, tenant_id, action, observation)
    }

    fn append_note(&self, tenant_id: &str, note: serde_json::Value) -> u64 {
        MemoryStore::append_note(self, tenant_id, note)
    }

    fn context_summary(&self, goal: &Goal) -> ContextSummary {
        MemoryStore::context_summary(self, goal)
    }

    fn episode_count(&self, tenant_id: &str) -> usize {
        MemoryStore::episode_count(self, tenant_id)
    }
}
