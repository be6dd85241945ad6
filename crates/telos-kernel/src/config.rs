//! Unified engine configuration.
//!
//! Every recognized option is an explicit field with a documented
//! default. Config is deserialized from TOML; absent sections and keys
//! fall back to their defaults, so a partial file is always valid.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Worker-side options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Cycles in flight per worker.
    pub concurrency: usize,
    /// Service-registry heartbeat interval.
    pub heartbeat_ms: u64,
    /// Idle sleep between queue polls.
    pub poll_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            heartbeat_ms: 15_000,
            poll_interval_ms: 200,
        }
    }
}

/// Job-queue options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub visibility_timeout_ms: u64,
    pub max_attempts: u32,
    /// Soft cap per priority lane; enqueue fails `Busy` when full.
    pub lane_capacity: usize,
    /// How long an idempotency key maps to its original job.
    pub idempotency_window_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_ms: 30_000,
            max_attempts: 3,
            lane_capacity: 1_024,
            idempotency_window_ms: 30_000,
        }
    }
}

/// Learning-store options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    pub max_patterns: usize,
    /// Minimum similarity for recall, in `[0, 1]`.
    pub similarity_threshold: f64,
    /// Age decay constant τ for eviction, in days.
    pub age_decay_days: f64,
    /// Compaction interval.
    pub compact_interval_ms: u64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            max_patterns: 1_000,
            similarity_threshold: 0.75,
            age_decay_days: 90.0,
            compact_interval_ms: 3_600_000,
        }
    }
}

/// Memory-store options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub working_capacity: usize,
    pub episodic_max_age_days: u32,
    /// Total episodic bytes retained per tenant.
    pub episodic_max_bytes: u64,
    /// Episodic entries included in a context summary.
    pub context_entries: usize,
    /// Serialized byte bound of a context summary.
    pub context_max_bytes: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            working_capacity: 256,
            episodic_max_age_days: 30,
            episodic_max_bytes: 50 * 1024 * 1024,
            context_entries: 8,
            context_max_bytes: 8 * 1024,
        }
    }
}

/// Action-selector scoring weights. A sum near 1.0 is recommended.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub weight_alignment: f64,
    pub weight_history: f64,
    pub weight_context: f64,
    pub weight_recency: f64,
    pub weight_cost: f64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            weight_alignment: 0.35,
            weight_history: 0.30,
            weight_context: 0.20,
            weight_recency: 0.05,
            weight_cost: 0.10,
        }
    }
}

/// Tool-invocation options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Per-tool execution timeout.
    pub default_timeout_ms: u64,
    /// Base delay of the exponential retry backoff.
    pub retry_base_ms: u64,
    /// Backoff cap.
    pub retry_max_ms: u64,
    /// Default total attempts for idempotent tools.
    pub max_attempts: u32,
    /// Grace given to a cancelled invocation before it is abandoned.
    pub cancel_grace_ms: u64,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            retry_base_ms: 100,
            retry_max_ms: 5_000,
            max_attempts: 3,
            cancel_grace_ms: 2_000,
        }
    }
}

/// Cycle-level options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    /// Consecutive failures before a goal is marked failed.
    pub max_failures: u32,
    /// Observation score at or above which a completed plan counts as
    /// goal satisfaction.
    pub success_threshold: f64,
    /// Upper bound on cycles one job may run before handing back to the
    /// queue.
    pub max_cycles_per_job: u32,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            success_threshold: 0.5,
            max_cycles_per_job: 32,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub worker: WorkerConfig,
    pub queue: QueueConfig,
    pub learning: LearningConfig,
    pub memory: MemoryConfig,
    pub selector: SelectorConfig,
    pub tool: ToolConfig,
    pub cycle: CycleConfig,
}

impl EngineConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidInput`] on malformed TOML or on a
    /// value that fails [`EngineConfig::validate`].
    pub fn from_toml_str(s: &str) -> EngineResult<Self> {
        let config: Self = toml::from_str(s)
            .map_err(|e| EngineError::InvalidInput(format!("config parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> EngineResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Check cross-field invariants.
    pub fn validate(&self) -> EngineResult<()> {
        if self.worker.concurrency == 0 {
            return Err(EngineError::InvalidInput(
                "worker.concurrency must be ≥ 1".into(),
            ));
        }
        if self.queue.max_attempts == 0 {
            return Err(EngineError::InvalidInput(
                "queue.max_attempts must be ≥ 1".into(),
            ));
        }
        if self.learning.max_patterns == 0 {
            return Err(EngineError::InvalidInput(
                "learning.max_patterns must be ≥ 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.learning.similarity_threshold) {
            return Err(EngineError::InvalidInput(
                "learning.similarity_threshold outside [0, 1]".into(),
            ));
        }
        let weights = [
            self.selector.weight_alignment,
            self.selector.weight_history,
            self.selector.weight_context,
            self.selector.weight_recency,
            self.selector.weight_cost,
        ];
        if weights.iter().any(|w| *w < 0.0 || *w > 1.0) {
            return Err(EngineError::InvalidInput(
                "selector weights must lie in [0, 1]".into(),
            ));
        }
        if self.memory.working_capacity == 0 {
            return Err(EngineError::InvalidInput(
                "memory.working_capacity must be ≥ 1".into(),
            ));
        }
        Ok(())
    }

    /// The service-registry TTL: three missed heartbeats.
    pub fn registry_ttl_ms(&self) -> u64 {
        self.worker.heartbeat_ms.saturating_mul(3)
    }

    /// Learning age-decay constant in milliseconds.
    pub fn age_decay_ms(&self) -> f64 {
        self.learning.age_decay_days * 86_400_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.worker.concurrency, 1);
        assert_eq!(config.worker.heartbeat_ms, 15_000);
        assert_eq!(config.queue.visibility_timeout_ms, 30_000);
        assert_eq!(config.queue.max_attempts, 3);
        assert_eq!(config.learning.max_patterns, 1_000);
        assert_eq!(config.learning.similarity_threshold, 0.75);
        assert_eq!(config.memory.working_capacity, 256);
        assert_eq!(config.memory.episodic_max_age_days, 30);
        assert_eq!(config.cycle.max_failures, 5);
        assert_eq!(config.selector.weight_alignment, 0.35);
        assert_eq!(config.registry_ttl_ms(), 45_000);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [queue]
            visibility_timeout_ms = 10000

            [learning]
            max_patterns = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.queue.visibility_timeout_ms, 10_000);
        assert_eq!(config.queue.max_attempts, 3);
        assert_eq!(config.learning.max_patterns, 3);
        assert_eq!(config.memory.working_capacity, 256);
    }

    #[test]
    fn validation_rejects_zero_concurrency() {
        let err = EngineConfig::from_toml_str("[worker]\nconcurrency = 0\n").unwrap_err();
        assert!(err.to_string().contains("concurrency"));
    }

    #[test]
    fn validation_rejects_bad_threshold() {
        let err =
            EngineConfig::from_toml_str("[learning]\nsimilarity_threshold = 1.5\n").unwrap_err();
        assert!(err.to_string().contains("similarity_threshold"));
    }

    #[test]
    fn malformed_toml_is_invalid_input() {
        assert!(EngineConfig::from_toml_str("not toml [").is_err());
    }

    #[test]
    fn loads_from_a_file() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[cycle]\nmax_failures = 7\n").unwrap();
        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.cycle.max_failures, 7);
    }
}
