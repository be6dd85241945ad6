//! Service registry with TTL heartbeats.
//!
//! Workers register on startup and heartbeat on an interval; entries
//! that miss three heartbeats expire and are evicted. Dispatchers only
//! consider live entries.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use telos_kernel::clock::Clock;
use telos_kernel::error::{EngineError, EngineResult};
use telos_kernel::job::ServiceEntry;

/// The shared service registry.
pub struct ServiceRegistry {
    entries: DashMap<String, ServiceEntry>,
    ttl_ms: u64,
    clock: Arc<dyn Clock>,
}

impl ServiceRegistry {
    pub fn new(ttl_ms: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl_ms,
            clock,
        }
    }

    /// Register (or re-register) a service.
    pub fn register(
        &self,
        service_id: &str,
        kind: &str,
        capabilities: HashSet<String>,
        addr: &str,
    ) {
        let now = self.clock.now_millis();
        info!(service_id, kind, "service registered");
        self.entries.insert(
            service_id.to_string(),
            ServiceEntry {
                service_id: service_id.to_string(),
                kind: kind.to_string(),
                capabilities,
                addr: addr.to_string(),
                last_heartbeat: now,
                ttl_ms: self.ttl_ms,
            },
        );
    }

    /// Refresh a service's heartbeat.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidInput`] for unknown services; the
    /// caller should re-register.
    pub fn heartbeat(&self, service_id: &str) -> EngineResult<()> {
        let now = self.clock.now_millis();
        match self.entries.get_mut(service_id) {
            Some(mut entry) => {
                entry.last_heartbeat = now;
                Ok(())
            }
            None => Err(EngineError::InvalidInput(format!(
                "unknown service '{service_id}'"
            ))),
        }
    }

    pub fn deregister(&self, service_id: &str) -> bool {
        self.entries.remove(service_id).is_some()
    }

    /// Live entries only; expired ones are skipped.
    pub fn live_entries(&self) -> Vec<ServiceEntry> {
        let now = self.clock.now_millis();
        self.entries
            .iter()
            .filter(|e| !e.is_expired(now))
            .map(|e| e.clone())
            .collect()
    }

    /// Live entries of a given kind.
    pub fn live_of_kind(&self, kind: &str) -> Vec<ServiceEntry> {
        self.live_entries()
            .into_iter()
            .filter(|e| e.kind == kind)
            .collect()
    }

    /// Remove expired entries; returns how many were evicted.
    pub fn evict_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        let evicted = before - self.entries.len();
        if evicted > 0 {
            debug!(evicted, "expired services evicted");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
