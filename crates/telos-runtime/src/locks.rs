//! Per-`(tenant, goal)` cycle locks.
//!
//! At most one worker runs a cycle for a given goal at a time. Locks
//! carry a TTL equal to the visibility timeout so a crashed holder never
//! wedges the goal: an expired lock is claimable by anyone.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use telos_kernel::clock::Clock;
use telos_kernel::error::{EngineError, EngineResult};
use telos_kernel::goal::GoalId;

#[derive(Debug, Clone)]
struct LockEntry {
    holder: String,
    expires_at: u64,
}

/// The shared lock table.
pub struct CycleLockTable {
    locks: DashMap<(String, GoalId), LockEntry>,
    ttl_ms: u64,
    clock: Arc<dyn Clock>,
}

impl CycleLockTable {
    pub fn new(ttl_ms: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            locks: DashMap::new(),
            ttl_ms,
            clock,
        }
    }

    /// Try to take the `(tenant, goal)` lock for `holder`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::LockUnavailable`] when another holder owns
    /// an unexpired lock.
    pub fn try_acquire(
        self: &Arc<Self>,
        tenant_id: &str,
        goal_id: GoalId,
        holder: &str,
    ) -> EngineResult<CycleLockGuard> {
        let now = self.clock.now_millis();
        let key = (tenant_id.to_string(), goal_id);
        let mut acquired = false;
        self.locks
            .entry(key.clone())
            .and_modify(|entry| {
                if entry.holder == holder || now >= entry.expires_at {
                    entry.holder = holder.to_string();
                    entry.expires_at = now + self.ttl_ms;
                    acquired = true;
                }
            })
            .or_insert_with(|| {
                acquired = true;
                LockEntry {
                    holder: holder.to_string(),
                    expires_at: now + self.ttl_ms,
                }
            });

        if !acquired {
            return Err(EngineError::LockUnavailable {
                tenant: tenant_id.to_string(),
                goal_id: goal_id.to_string(),
            });
        }
        debug!(tenant = tenant_id, goal = %goal_id, holder, "cycle lock acquired");
        Ok(CycleLockGuard {
            table: self.clone(),
            key,
            holder: holder.to_string(),
        })
    }

    /// Whether an unexpired lock exists for the pair.
    pub fn is_locked(&self, tenant_id: &str, goal_id: GoalId) -> bool {
        let now = self.clock.now_millis();
        self.locks
            .get(&(tenant_id.to_string(), goal_id))
            .is_some_and(|e| now < e.expires_at)
    }

    fn renew(&self, key: &(String, GoalId), holder: &str) {
        let now = self.clock.now_millis();
        if let Some(mut entry) = self.locks.get_mut(key)
            && entry.holder == holder
        {
            entry.expires_at = now + self.ttl_ms;
        }
    }

    fn release(&self, key: &(String, GoalId), holder: &str) {
        self.locks
            .remove_if(key, |_, entry| entry.holder == holder);
    }
}

/// Holds the lock until dropped. Release is idempotent and only removes
/// the entry while this guard's holder still owns it.
pub struct CycleLockGuard {
    table: Arc<CycleLockTable>,
    key: (String, GoalId),
    holder: String,
}

impl CycleLockGuard {
    /// Extend the lock TTL alongside the visibility heartbeat.
    pub fn renew(&self) {
        self.table.renew(&self.key, &self.holder);
    }
}

impl Drop for CycleLockGuard {
    fn drop(&mut self) {
        self.table.release(&self.key, &self.holder);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telos_kernel::clock::ManualClock;
    use uuid::Uuid;

    fn table() -> (Arc<CycleLockTable>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at(0));
        (Arc::new(CycleLockTable::new(30_000, clock.clone())), clock)
    }

    #[test]
    fn second_holder_is_rejected() {
        let (table, _clock) = table();
        let goal = Uuid::new_v4();
        let _guard = table.try_acquire("acme", goal, "w-1").unwrap();
        let err = table.try_acquire("acme", goal, "w-2");
        assert!(matches!(err, Err(EngineError::LockUnavailable { .. })));
    }

    #[test]
    fn drop_releases_the_lock() {
        let (table, _clock) = table();
        let goal = Uuid::new_v4();
        {
            let _guard = table.try_acquire("acme", goal, "w-1").unwrap();
            assert!(table.is_locked("acme", goal));
        }
        assert!(!table.is_locked("acme", goal));
        assert!(table.try_acquire("acme", goal, "w-2").is_ok());
    }

    #[test]
    fn expired_lock_is_claimable() {
        let (table, clock) = table();
        let goal = Uuid::new_v4();
        let guard = table.try_acquire("acme", goal, "w-1").unwrap();
        clock.advance(30_001);
        // the lease lapsed: another worker may take over
        let second = table.try_acquire("acme", goal, "w-2").unwrap();
        assert!(table.is_locked("acme", goal));

        // the stale guard's release must not free w-2's lock
        drop(guard);
        assert!(table.is_locked("acme", goal));
        drop(second);
        assert!(!table.is_locked("acme", goal));
    }

    #[test]
    fn renew_extends_the_ttl() {
        let (table, clock) = table();
        let goal = Uuid::new_v4();
        let guard = table.try_acquire("acme", goal, "w-1").unwrap();
        clock.advance(20_000);
        guard.renew();
        clock.advance(20_000);
        // 40s elapsed, renewed at 20s
        assert!(table.is_locked("acme", goal));
        let err = table.try_acquire("acme", goal, "w-2");
        assert!(err.is_err());
    }

    #[test]
    fn different_goals_do_not_contend() {
        let (table, _clock) = table();
        let _a = table.try_acquire("acme", Uuid::new_v4(), "w-1").unwrap();
        let _b = table.try_acquire("acme", Uuid::new_v4(), "w-2").unwrap();
    }
}
