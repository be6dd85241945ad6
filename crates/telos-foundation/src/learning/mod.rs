//! Cross-session learning store.
//!
//! Maps goal signatures to proven action sequences with confidence.
//! Bounded to `max_patterns`; compaction evicts by
//! `confidence · ln(1+usage) · exp(-age/τ)`. Updates for the same
//! signature are serialized by a sharded mutex; readers see either the
//! pre- or post-update state.

pub mod signature;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use telos_kernel::clock::Clock;
use telos_kernel::config::LearningConfig;
use telos_kernel::goal::Goal;
use telos_kernel::learning::{LearningRecord, Pattern};
use telos_kernel::tool::ToolCatalog;

use signature::{Embedder, cosine, jaccard, signature as make_signature, tokenize};

const SHARD_COUNT: usize = 16;

/// A successful recall: the matched record plus match metadata.
#[derive(Debug, Clone)]
pub struct RecallResult {
    pub record: LearningRecord,
    pub goal_class: String,
    pub similarity: f64,
}

/// The cross-session knowledge base.
pub struct LearningStore {
    shards: Vec<Mutex<HashMap<u64, Pattern>>>,
    config: LearningConfig,
    clock: Arc<dyn Clock>,
    embedder: Option<Arc<dyn Embedder>>,
    last_compact_ms: AtomicU64,
}

impl LearningStore {
    pub fn new(config: LearningConfig, clock: Arc<dyn Clock>) -> Self {
        let shards = (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect();
        Self {
            shards,
            config,
            clock,
            embedder: None,
            last_compact_ms: AtomicU64::new(0),
        }
    }

    /// Plug in an embedding backend for similarity scoring.
    #[must_use]
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    fn shard_for(&self, sig: u64) -> &Mutex<HashMap<u64, Pattern>> {
        &self.shards[(sig as usize) % SHARD_COUNT]
    }

    /// Find the best-matching record for a goal, if any clears the
    /// similarity threshold. Tools that no longer exist are filtered out
    /// of the returned sequence; a fully stale sequence is skipped.
    pub fn recall(&self, goal: &Goal, catalog: &dyn ToolCatalog) -> Option<RecallResult> {
        let goal_tokens = tokenize(&goal.description);
        let goal_embedding = self.embedder.as_ref().map(|e| e.embed(&goal.description));

        let mut best: Option<(f64, Pattern)> = None;
        for shard in &self.shards {
            let shard = shard.lock();
            for pattern in shard.values() {
                let similarity = match (&goal_embedding, &self.embedder) {
                    (Some(embedding), Some(embedder)) => {
                        cosine(embedding, &embedder.embed(&pattern.exemplar))
                    }
                    _ => jaccard(&goal_tokens, &pattern.tokens),
                };
                if similarity < self.config.similarity_threshold {
                    continue;
                }
                let better = match &best {
                    None => true,
                    Some((best_sim, best_pattern)) => {
                        similarity > *best_sim
                            || (similarity == *best_sim
                                && pattern.success_rate > best_pattern.success_rate)
                    }
                };
                if better {
                    best = Some((similarity, pattern.clone()));
                }
            }
        }

        let (similarity, pattern) = best?;
        let live_sequence: Vec<String> = pattern
            .action_sequence
            .iter()
            .filter(|tool| catalog.contains(tool))
            .cloned()
            .collect();
        if live_sequence.is_empty() {
            debug!(signature = pattern.signature, "recalled pattern has no live tools");
            return None;
        }

        // touch recency under the signature mutex
        let now = self.clock.now_millis();
        {
            let mut shard = self.shard_for(pattern.signature).lock();
            if let Some(stored) = shard.get_mut(&pattern.signature) {
                stored.last_used_at = now;
            }
        }

        let mut record = pattern.to_record();
        record.action_sequence = live_sequence;
        record.last_used_at = now;
        Some(RecallResult {
            record,
            goal_class: pattern.goal_class,
            similarity,
        })
    }

    /// Upsert the outcome of a finished goal.
    ///
    /// New signatures start at `confidence = 0.3 · outcome`; existing ones
    /// move by `confidence ← clamp(0.7·confidence + 0.3·outcome, 0, 1)`.
    pub fn record(
        &self,
        goal: &Goal,
        goal_class: &str,
        action_sequence: Vec<String>,
        outcome_score: f64,
    ) {
        let tokens = tokenize(&goal.description);
        let sig = make_signature(goal_class, &tokens);
        let now = self.clock.now_millis();

        {
            let mut shard = self.shard_for(sig).lock();
            let pattern = shard.entry(sig).or_insert_with(|| Pattern {
                pattern_id: Uuid::new_v4(),
                signature: sig,
                exemplar: goal.description.clone(),
                goal_class: goal_class.to_string(),
                tokens: tokens.clone(),
                action_sequence: action_sequence.clone(),
                success_rate: 0.0,
                usage_count: 0,
                created_at: now,
                last_used_at: now,
            });
            pattern.success_rate =
                (0.7 * pattern.success_rate + 0.3 * outcome_score).clamp(0.0, 1.0);
            pattern.usage_count += 1;
            pattern.last_used_at = now;
            if outcome_score > 0.0 {
                pattern.action_sequence = action_sequence;
            }
        }

        self.maybe_compact();
    }

    /// Evict lowest-value patterns until the store fits `max_patterns`.
    pub fn compact(&self) {
        let now = self.clock.now_millis();
        self.last_compact_ms.store(now, Ordering::Relaxed);

        let total: usize = self.shards.iter().map(|s| s.lock().len()).sum();
        if total <= self.config.max_patterns {
            return;
        }
        let age_decay_ms = self.config.age_decay_days * 86_400_000.0;

        // rank all patterns by eviction value, lowest first
        let mut ranked: Vec<(f64, u64)> = self
            .shards
            .iter()
            .flat_map(|s| {
                s.lock()
                    .values()
                    .map(|p| (p.eviction_value(now, age_decay_ms), p.signature))
                    .collect::<Vec<_>>()
            })
            .collect();
        ranked.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let excess = total - self.config.max_patterns;
        for (_, sig) in ranked.into_iter().take(excess) {
            self.shard_for(sig).lock().remove(&sig);
        }
        debug!(evicted = excess, "learning store compacted");
    }

    /// Run [`compact`](Self::compact) when the interval elapsed or the
    /// store is over capacity.
    pub fn maybe_compact(&self) {
        let now = self.clock.now_millis();
        let last = self.last_compact_ms.load(Ordering::Relaxed);
        let due = now.saturating_sub(last) >= self.config.compact_interval_ms;
        let over = self.len() > self.config.max_patterns;
        if due || over {
            self.compact();
        }
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
