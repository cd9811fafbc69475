//! Reciprocal Rank Fusion.
//!
//! Each arm contributes `w_arm / (rrf_k + rank)` per fact, ranks starting
//! at 1. Defaults: semantic 0.6, lexical 0.4, `rrf_k` 60.

use std::collections::BTreeMap;

/// Default weight of the semantic arm.
pub const W_SEMANTIC: f64 = 0.6;
/// Default weight of the lexical arm.
pub const W_LEXICAL: f64 = 0.4;
/// Rank damping constant.
pub const RRF_K: f64 = 60.0;

/// Fuses ranked id lists into `(fact_id, score)` pairs, best first.
/// Ties break toward the lower fact id so output order is deterministic.
pub fn reciprocal_rank_fusion(
    arms: &[(&[i64], f64)],
    rrf_k: f64,
    top_k: usize,
) -> Vec<(i64, f64)> {
    let mut scores: BTreeMap<i64, f64> = BTreeMap::new();
    for (ranked, weight) in arms {
        for (position, fact_id) in ranked.iter().enumerate() {
            let rank = (position + 1) as f64;
            *scores.entry(*fact_id).or_insert(0.0) += weight / (rrf_k + rank);
        }
    }
    let mut fused: Vec<(i64, f64)> = scores.into_iter().collect();
    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    fused.truncate(top_k);
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agreement_beats_single_arm() {
        let semantic = [1i64, 2, 3];
        let lexical = [2i64, 4];
        let fused = reciprocal_rank_fusion(
            &[(&semantic, W_SEMANTIC), (&lexical, W_LEXICAL)],
            RRF_K,
            10,
        );
        // Fact 2 appears in both arms and outranks everything.
        assert_eq!(fused[0].0, 2);
    }

    #[test]
    fn semantic_weight_dominates_on_equal_rank() {
        let semantic = [10i64];
        let lexical = [20i64];
        let fused = reciprocal_rank_fusion(
            &[(&semantic, W_SEMANTIC), (&lexical, W_LEXICAL)],
            RRF_K,
            10,
        );
        assert_eq!(fused[0].0, 10);
        assert_eq!(fused[1].0, 20);
    }

    #[test]
    fn truncates_to_top_k() {
        let semantic = [1i64, 2, 3, 4, 5];
        let fused = reciprocal_rank_fusion(&[(&semantic, W_SEMANTIC)], RRF_K, 2);
        assert_eq!(fused.len(), 2);
        assert_eq!(fused[0].0, 1);
    }

    #[test]
    fn empty_arms_fuse_to_nothing() {
        let fused = reciprocal_rank_fusion(&[(&[], W_SEMANTIC), (&[], W_LEXICAL)], RRF_K, 5);
        assert!(fused.is_empty());
    }
}
