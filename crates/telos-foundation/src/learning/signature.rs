//! Goal-text normalization and similarity.
//!
//! Signatures must be stable under minor text variation, so descriptions
//! are normalized to a token set: lowercase, alphanumeric split, stopword
//! removal, dedup. Similarity is token-set Jaccard unless an embedder is
//! plugged in.

use std::collections::HashSet;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Common English function words stripped during normalization.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "in", "into", "is", "it",
    "of", "on", "or", "that", "the", "this", "to", "was", "were", "will", "with",
];

/// Optional embedding hook. When present, similarity uses cosine distance
/// over embeddings instead of token-set Jaccard.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// Normalize text to a sorted, deduplicated token list.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens: Vec<String> = text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty() && !STOPWORDS.contains(t))
        .map(String::from)
        .collect();
    tokens.sort();
    tokens.dedup();
    tokens
}

/// Stable signature over `(goal_class, normalized description tokens)`.
pub fn signature(goal_class: &str, tokens: &[String]) -> u64 {
    let mut hasher = DefaultHasher::new();
    goal_class.hash(&mut hasher);
    for token in tokens {
        token.hash(&mut hasher);
    }
    hasher.finish()
}

/// Token-set Jaccard similarity in `[0, 1]`.
pub fn jaccard(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let set_a: HashSet<&String> = a.iter().collect();
    let set_b: HashSet<&String> = b.iter().collect();
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Cosine similarity between two embeddings, in `[-1, 1]`.
pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        f64::from(dot / (norm_a * norm_b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_strips_case_punctuation_and_stopwords() {
        let tokens = tokenize("Summarize the Topic: X!");
        assert_eq!(tokens, vec!["summarize", "topic", "x"]);
    }

    #[test]
    fn signature_is_stable_under_minor_variation() {
        let a = signature("summarize", &tokenize("Summarize the topic X"));
        let b = signature("summarize", &tokenize("summarize topic x"));
        assert_eq!(a, b);
    }

    #[test]
    fn signature_differs_across_classes() {
        let tokens = tokenize("topic x");
        assert_ne!(signature("summarize", &tokens), signature("research", &tokens));
    }

    #[test]
    fn jaccard_bounds() {
        let a = tokenize("summarize topic rust");
        let b = tokenize("summarize topic python");
        let sim = jaccard(&a, &b);
        assert!(sim > 0.0 && sim < 1.0);
        assert_eq!(jaccard(&a, &a), 1.0);
        assert_eq!(jaccard(&a, &tokenize("unrelated words entirely")), 0.0);
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![0.5, 0.5, 0.0];
        assert!((cosine(&v, &v) - 1.0).abs() < 1e-6);
        assert_eq!(cosine(&v, &[0.1, 0.2]), 0.0); // length mismatch
    }
}
