//! Memory contract and entry records.
//!
//! Two bounded views exist: *working* memory (key/value, LRU + TTL) for
//! context reassembly within a cycle, and *episodic* memory (append-only,
//! age/size-bounded) for the durable history of actions and observations.
//! The [`Memory`] trait is the kernel-side contract over both; the
//! concrete store lives in `telos-foundation`.

use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::goal::Goal;
use crate::observation::Observation;

/// The bounded, deterministic context map assembled for one cycle.
pub type ContextSummary = serde_json::Map<String, serde_json::Value>;

/// Tenant-sharded memory: working and episodic views behind one facade.
///
/// Within a tenant, implementations serialize writes; across tenants
/// writes are independent. Episodic sequence numbers are strictly
/// monotonic per tenant.
pub trait Memory: Send + Sync {
    /// Insert or replace a working-memory entry. `ttl_ms` of `None`
    /// means the entry lives until evicted by capacity.
    fn working_put(
        &self,
        tenant_id: &str,
        key: &str,
        value: serde_json::Value,
        ttl_ms: Option<u64>,
    );

    /// Fetch a working-memory value, refreshing its recency.
    fn working_get(&self, tenant_id: &str, key: &str) -> Option<serde_json::Value>;

    /// Append a completed `(action, observation)` pair. Returns the two
    /// assigned sequence numbers; the observation immediately follows
    /// the action in append order.
    fn append_cycle(
        &self,
        tenant_id: &str,
        action: &Action,
        observation: &Observation,
    ) -> (u64, u64);

    /// Append a free-form episodic note, returning its sequence number.
    fn append_note(&self, tenant_id: &str, note: serde_json::Value) -> u64;

    /// Assemble the bounded cycle context for a goal.
    fn context_summary(&self, goal: &Goal) -> ContextSummary;

    /// Episodes currently retained for a tenant.
    fn episode_count(&self, tenant_id: &str) -> usize;
}

/// A working-memory entry: a value with an optional time-to-live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingEntry {
    pub key: String,
    pub value: serde_json::Value,
    /// Epoch milliseconds after which the entry is considered expired.
    /// `None` means the entry lives until evicted by capacity.
    pub expires_at: Option<u64>,
}

impl WorkingEntry {
    pub fn is_expired(&self, now_millis: u64) -> bool {
        self.expires_at.is_some_and(|t| now_millis >= t)
    }
}

/// The kind of an episodic entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeKind {
    Action,
    Observation,
    Note,
}

/// One entry of the append-only episodic log.
///
/// `seq` is strictly monotonic per tenant; append order equals physical
/// order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicEntry {
    pub seq: u64,
    pub kind: EpisodeKind,
    pub payload: serde_json::Value,
    /// Epoch milliseconds at which the entry was appended.
    pub ts: u64,
}

impl EpisodicEntry {
    /// Approximate stored size, used for byte-bounded trimming.
    pub fn byte_size(&self) -> usize {
        // seq + ts + kind tag, plus the serialized payload
        24 + self.payload.to_string().len()
    }
}
