//! Cross-session learning records.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable primary key for a pattern.
pub type PatternId = Uuid;

/// A learned mapping from a goal signature to a proven action sequence.
///
/// The signature is stable under minor text variation: descriptions are
/// normalized (lowercase, stopword removal, token set) before hashing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningRecord {
    /// Hash of `(goal_class, normalized_description)`.
    pub signature: u64,
    /// Ordered tool names that resolved goals with this signature.
    pub action_sequence: Vec<String>,
    /// Belief that replaying the sequence succeeds, in `[0, 1]`.
    pub confidence: f64,
    pub usage_count: u64,
    /// Epoch milliseconds of last recall or record.
    pub last_used_at: u64,
    /// Confidence decay applied per age period. Reserved for adapters
    /// that re-score on load.
    pub decay_rate: f64,
}

/// A persisted pattern row: a [`LearningRecord`] plus provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub pattern_id: PatternId,
    pub signature: u64,
    /// The goal text the pattern was first learned from.
    pub exemplar: String,
    /// Goal class the signature was derived under.
    pub goal_class: String,
    /// Normalized token set of the exemplar, used for similarity.
    pub tokens: Vec<String>,
    pub action_sequence: Vec<String>,
    pub success_rate: f64,
    pub usage_count: u64,
    pub created_at: u64,
    pub last_used_at: u64,
}

impl Pattern {
    /// Eviction value: `confidence · ln(1 + usage) · exp(-age / τ)`.
    /// Lowest-valued patterns are removed first when over capacity.
    pub fn eviction_value(&self, now_millis: u64, age_decay_ms: f64) -> f64 {
        let age_ms = now_millis.saturating_sub(self.last_used_at) as f64;
        let decay = if age_decay_ms > 0.0 {
            (-age_ms / age_decay_ms).exp()
        } else {
            1.0
        };
        self.success_rate * (1.0 + self.usage_count as f64).ln() * decay
    }

    /// View this pattern as a learning record for recall.
    pub fn to_record(&self) -> LearningRecord {
        LearningRecord {
            signature: self.signature,
            action_sequence: self.action_sequence.clone(),
            confidence: self.success_rate,
            usage_count: self.usage_count,
            last_used_at: self.last_used_at,
            decay_rate: 0.0,
        }
    }
}
