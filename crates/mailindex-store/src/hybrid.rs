//! Score normalization and tiered merging of keyword and vector candidates.

use std::cmp::Ordering;
use std::collections::HashMap;

use mailindex_core::config::hybrid::{MIN_VECTOR_ONLY_SCORE, TEXT_WEIGHT, VECTOR_WEIGHT};

/// Converts an FTS5 `bm25()` rank (negative, lower is better) into `0..1`.
pub(crate) fn bm25_rank_to_score(rank: f64) -> f64 {
    let positive = if rank.is_finite() { (-rank).max(0.0) } else { 0.0 };
    positive / (1.0 + positive)
}

/// A candidate after keyword and vector scores have been combined.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct MergedCandidate {
    pub rowid: i64,
    pub hybrid: f64,
    /// Whether the row matched the FTS expression (and so carries a snippet).
    pub text_match: bool,
}

/// Combines keyword hits `(rowid, bm25 rank)` with vector hits `(rowid, cosine)`.
///
/// Keyword hits are always kept. Vector-only hits need at least
/// `MIN_VECTOR_ONLY_SCORE`. With no vector hits the text score stands alone.
pub(crate) fn merge_candidates(text: &[(i64, f64)], vector: &[(i64, f32)]) -> Vec<MergedCandidate> {
    let mut scores: HashMap<i64, (Option<f64>, f64)> = HashMap::new();
    for &(rowid, rank) in text {
        scores.entry(rowid).or_insert((None, 0.0)).0 = Some(bm25_rank_to_score(rank));
    }
    for &(rowid, similarity) in vector {
        scores.entry(rowid).or_insert((None, 0.0)).1 = f64::from(similarity).clamp(0.0, 1.0);
    }

    let vector_active = !vector.is_empty();
    scores
        .into_iter()
        .filter_map(|(rowid, (text_score, vector_score))| {
            let hybrid = if vector_active {
                VECTOR_WEIGHT * vector_score + TEXT_WEIGHT * text_score.unwrap_or(0.0)
            } else {
                text_score.unwrap_or(0.0)
            };
            let text_match = text_score.is_some();
            (text_match || hybrid >= MIN_VECTOR_ONLY_SCORE).then_some(MergedCandidate {
                rowid,
                hybrid,
                text_match,
            })
        })
        .collect()
}

/// A hit awaiting final ordering.
#[derive(Debug, Clone)]
pub(crate) struct Tiered<T> {
    /// 0 for exact matches on identifying fields, 1 otherwise.
    pub tier: u8,
    pub hybrid: f64,
    pub date_ms: i64,
    pub rowid: i64,
    pub hit: T,
}

/// Orders hits (tier, then score, then recency) and assigns `rank = tier - hybrid`,
/// so a lower rank is always a better hit.
pub(crate) fn finalize<T>(mut hits: Vec<Tiered<T>>, limit: usize) -> Vec<(f64, T)> {
    hits.sort_by(|left, right| {
        left.tier
            .cmp(&right.tier)
            .then_with(|| {
                right
                    .hybrid
                    .partial_cmp(&left.hybrid)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| right.date_ms.cmp(&left.date_ms))
            .then_with(|| right.rowid.cmp(&left.rowid))
    });
    hits.truncate(limit);
    hits.into_iter()
        .map(|hit| (f64::from(hit.tier) - hit.hybrid.clamp(0.0, 1.0), hit.hit))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_bm25_rank_to_score_is_monotonic_and_bounded() {
        assert_eq!(bm25_rank_to_score(0.0), 0.0);
        let good = bm25_rank_to_score(-10.0);
        let great = bm25_rank_to_score(-50.0);
        assert!(good > 0.0 && great > good && great < 1.0);
        assert_eq!(bm25_rank_to_score(f64::NAN), 0.0);
    }

    #[test]
    fn unit_merge_keeps_text_hits_and_filters_weak_vector_only_hits() {
        let merged = merge_candidates(&[(1, -0.01)], &[(2, 0.05), (3, 0.9)]);
        let rowids = {
            let mut rowids = merged.iter().map(|candidate| candidate.rowid).collect::<Vec<_>>();
            rowids.sort_unstable();
            rowids
        };
        assert_eq!(rowids, vec![1, 3]);
        assert!(merged.iter().any(|candidate| candidate.rowid == 1 && candidate.text_match));
        assert!(merged.iter().any(|candidate| candidate.rowid == 3 && !candidate.text_match));
    }

    #[test]
    fn unit_merge_without_vectors_uses_text_score_alone() {
        let merged = merge_candidates(&[(7, -3.0)], &[]);
        assert_eq!(merged.len(), 1);
        assert!((merged[0].hybrid - 0.75).abs() < 1e-9);
    }

    #[test]
    fn functional_finalize_puts_exact_tier_first_with_monotonic_rank() {
        let hits = vec![
            Tiered { tier: 1, hybrid: 0.95, date_ms: 10, rowid: 1, hit: "strong token match" },
            Tiered { tier: 0, hybrid: 0.20, date_ms: 5, rowid: 2, hit: "exact author match" },
            Tiered { tier: 1, hybrid: 0.40, date_ms: 30, rowid: 3, hit: "weak token match" },
        ];
        let ranked = finalize(hits, 10);
        let order = ranked.iter().map(|(_, hit)| *hit).collect::<Vec<_>>();
        assert_eq!(order, vec!["exact author match", "strong token match", "weak token match"]);
        assert!(ranked.windows(2).all(|pair| pair[0].0 <= pair[1].0));
    }

    #[test]
    fn unit_finalize_truncates_to_limit() {
        let hits = (0..5)
            .map(|rowid| Tiered { tier: 1, hybrid: 0.5, date_ms: rowid, rowid, hit: rowid })
            .collect::<Vec<_>>();
        let ranked = finalize(hits, 2);
        assert_eq!(ranked.iter().map(|(_, hit)| *hit).collect::<Vec<_>>(), vec![4, 3]);
    }
}
