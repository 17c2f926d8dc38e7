//! Pure scoring math for memory decay, access weighting, and retrieval
//! ranking (§3, §4.6). Kept free of I/O so the formulas can be tested in
//! isolation against the invariants in §8.
//!
//! The cosine-similarity helper is grounded on the teacher's
//! `memory/embedding.rs::cosine_similarity`, kept verbatim because the
//! formula itself is stack-independent; only its caller (an external
//! `LanguageModel::embed()` collaborator instead of a local ONNX session)
//! changed.

use crate::config::MemoryScoringConfig;
use crate::model::{Memory, MemoryKind};

/// Days between `last_accessed` and `now`, never negative.
#[must_use]
pub fn days_since_access(memory: &Memory, now: i64) -> f32 {
    let secs = (now - memory.last_accessed).max(0);
    secs as f32 / 86_400.0
}

/// `decay_factor = 0.5^(days_since_access / (base_half_life * retention_multiplier))`.
#[must_use]
pub fn decay_factor(kind: MemoryKind, days_since_access: f32, base_half_life_days: f32) -> f32 {
    let half_life = base_half_life_days * kind.retention_multiplier();
    if half_life <= 0.0 {
        return 0.0;
    }
    0.5_f32.powf(days_since_access / half_life)
}

/// `access_bonus = min(1.0, 0.5 + 0.1*ln(1+access_count))`.
#[must_use]
pub fn access_bonus(access_count: u32) -> f32 {
    (0.5 + 0.1 * (1.0 + access_count as f32).ln()).min(1.0)
}

/// `effective_importance = clamp(floor, max, base * type_weight * decay * access_bonus)`.
#[must_use]
pub fn effective_importance(memory: &Memory, cfg: &MemoryScoringConfig, now: i64) -> f32 {
    let days = days_since_access(memory, now);
    let decay = decay_factor(memory.kind, days, cfg.base_half_life_days);
    let bonus = access_bonus(memory.access_count);
    let raw = memory.base_importance * memory.kind.type_weight() * decay * bonus;
    raw.clamp(cfg.minimum_floor, 1.0)
}

/// Cosine similarity between two equal-length vectors. Returns 0.0 for
/// mismatched lengths or zero-magnitude vectors rather than panicking or
/// producing `NaN` — retrieval treats an unusable embedding as "no match"
/// rather than failing the whole request (§7 InternalInvariant policy).
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// The §4.6 step-3 retrieval score: weighted sum of semantic similarity,
/// decay-adjusted importance, recency, and access terms.
#[must_use]
pub fn retrieval_score(memory: &Memory, similarity: f32, cfg: &MemoryScoringConfig, now: i64) -> f32 {
    let days = days_since_access(memory, now);
    let decay = decay_factor(memory.kind, days, cfg.base_half_life_days);
    let bonus = access_bonus(memory.access_count);
    cfg.weight_semantic * similarity
        + cfg.weight_importance * memory.base_importance * memory.kind.type_weight() * decay
        + cfg.weight_recency * decay
        + cfg.weight_access * bonus
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> MemoryScoringConfig {
        MemoryScoringConfig::default()
    }

    #[test]
    fn decay_at_zero_elapsed_is_identity() {
        let d = decay_factor(MemoryKind::Significant, 0.0, 14.0);
        assert!((d - 1.0).abs() < 1e-6);
    }

    #[test]
    fn decay_halves_at_one_half_life() {
        let d = decay_factor(MemoryKind::Observation, 14.0, 14.0);
        assert!((d - 0.5).abs() < 1e-4);
    }

    #[test]
    fn significant_decays_slower_than_transient() {
        let sig = decay_factor(MemoryKind::Significant, 30.0, 14.0);
        let tr = decay_factor(MemoryKind::Transient, 30.0, 14.0);
        assert!(sig > tr);
    }

    #[test]
    fn access_bonus_is_monotone_and_capped() {
        let b0 = access_bonus(0);
        let b10 = access_bonus(10);
        let b_huge = access_bonus(1_000_000);
        assert!(b10 > b0);
        assert!(b_huge <= 1.0);
        assert!((b0 - 0.5).abs() < 1e-6);
    }

    #[test]
    fn effective_importance_never_drops_below_floor() {
        let mut m = Memory::new("old chatter", MemoryKind::Transient, 0.01);
        m.last_accessed -= 365 * 86_400;
        let cfg = cfg();
        let e = effective_importance(&m, &cfg, crate::model::now_epoch_secs());
        assert!(e >= cfg.minimum_floor);
    }

    #[test]
    fn effective_importance_never_exceeds_one() {
        let m = Memory::new("fresh", MemoryKind::Significant, 1.0);
        let e = effective_importance(&m, &cfg(), m.created_at);
        assert!(e <= 1.0);
    }

    #[test]
    fn cosine_similarity_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn cosine_similarity_orthogonal_vectors_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_mismatched_lengths_is_zero_not_panic() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0, 2.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn retrieval_score_increases_with_similarity() {
        let m = Memory::new("x", MemoryKind::Preference, 0.5);
        let cfg = cfg();
        let now = m.created_at;
        let low = retrieval_score(&m, 0.1, &cfg, now);
        let high = retrieval_score(&m, 0.9, &cfg, now);
        assert!(high > low);
    }
}
