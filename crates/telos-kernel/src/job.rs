//! Job and service-registry records for the distributed layer.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::goal::GoalId;

/// Stable primary key for a job.
pub type JobId = Uuid;

/// Priority lane of the job queue. Workers poll lanes in strict priority
/// order: `Critical > High > Normal > Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Critical,
    High,
    Normal,
    Low,
}

impl JobPriority {
    /// All lanes in polling order.
    pub const LANES: [JobPriority; 4] = [
        JobPriority::Critical,
        JobPriority::High,
        JobPriority::Normal,
        JobPriority::Low,
    ];

    /// Lane index, `0` = highest priority.
    pub fn lane_index(&self) -> usize {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Normal => 2,
            Self::Low => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }
}

/// Queue-side lifecycle of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Claimed,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// A queued unit of work: one or more agent-loop cycles on a goal.
///
/// Owned by the queue until claimed, then co-owned with the claiming
/// worker under a visibility lease. The wire format preserves id,
/// priority, attempts, visibility deadline, and payload unmodified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub tenant_id: String,
    /// The goal this job advances. `None` lets the worker pick the next
    /// eligible goal for the tenant.
    pub goal_ref: Option<GoalId>,
    pub priority: JobPriority,
    pub payload: serde_json::Value,
    pub attempts: u32,
    pub max_attempts: u32,
    /// Epoch milliseconds after which a claimed job reverts to its lane.
    pub visibility_deadline: Option<u64>,
    pub status: JobStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub enqueued_at: u64,
    pub claimed_at: Option<u64>,
    pub finished_at: Option<u64>,
}

impl Job {
    pub fn new(
        tenant_id: impl Into<String>,
        goal_ref: Option<GoalId>,
        priority: JobPriority,
        payload: serde_json::Value,
        max_attempts: u32,
        now_millis: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            goal_ref,
            priority,
            payload,
            attempts: 0,
            max_attempts,
            visibility_deadline: None,
            status: JobStatus::Queued,
            result: None,
            error: None,
            enqueued_at: now_millis,
            claimed_at: None,
            finished_at: None,
        }
    }

    /// Whether a claimed job's visibility lease has lapsed.
    pub fn visibility_expired(&self, now_millis: u64) -> bool {
        self.status == JobStatus::Claimed
            && self.visibility_deadline.is_some_and(|d| now_millis >= d)
    }
}

/// A worker (or other service) registered for dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub service_id: String,
    /// Service kind, e.g. `worker`.
    pub kind: String,
    pub capabilities: HashSet<String>,
    pub addr: String,
    /// Epoch milliseconds of the most recent heartbeat.
    pub last_heartbeat: u64,
    pub ttl_ms: u64,
}

impl ServiceEntry {
    /// Whether the entry has missed enough heartbeats to be evicted.
    pub fn is_expired(&self, now_millis: u64) -> bool {
        now_millis.saturating_sub(self.last_heartbeat) > self.ttl_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lane_ordering() {
        assert!(JobPriority::Critical < JobPriority::High);
        assert!(JobPriority::High < JobPriority::Normal);
        assert!(JobPriority::Normal < JobPriority::Low);
        assert_eq!(JobPriority::Critical.lane_index(), 0);
        assert_eq!(JobPriority::Low.lane_index(), 3);
    }

    #[test]
    fn visibility_expiry_applies_to_claimed_jobs_only() {
        let mut job = Job::new("acme", None, JobPriority::Normal, json!({}), 3, 0);
        job.visibility_deadline = Some(100);
        assert!(!job.visibility_expired(200)); // still Queued
        job.status = JobStatus::Claimed;
        assert!(!job.visibility_expired(99));
        assert!(job.visibility_expired(100));
    }

    #[test]
    fn wire_roundtrip_preserves_claim_state() {
        let mut job = Job::new("acme", None, JobPriority::High, json!({"k": "v"}), 3, 10);
        job.status = JobStatus::Claimed;
        job.attempts = 2;
        job.visibility_deadline = Some(40_010);

        let bytes = serde_json::to_vec(&job).unwrap();
        let back: Job = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back.id, job.id);
        assert_eq!(back.priority, JobPriority::High);
        assert_eq!(back.attempts, 2);
        assert_eq!(back.visibility_deadline, Some(40_010));
        assert_eq!(back.payload, json!({"k": "v"}));
    }

    #[test]
    fn service_entry_expiry() {
        let entry = ServiceEntry {
            service_id: "w-1".into(),
            kind: "worker".into(),
            capabilities: HashSet::new(),
            addr: "local".into(),
            last_heartbeat: 1_000,
            ttl_ms: 45_000,
        };
        assert!(!entry.is_expired(46_000));
        assert!(entry.is_expired(46_001));
    }
}
