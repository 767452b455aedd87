//! Match fusion across stages feeding into a `fusion` node.
//!
//! Reciprocal Rank Fusion is the only method actually computed; `comb_sum`
//! and `comb_mnz` parse as configuration values but degrade to RRF with a
//! single warning the first time they're used (§9 Open Question: score
//! scales aren't comparable across retrievers without calibration this
//! pipeline doesn't do).

use crate::pipeline::Match;
use indexmap::IndexMap;
use std::sync::Once;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusionMethod {
    Rrf,
    CombSum,
    CombMnz,
}

impl FusionMethod {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "comb_sum" => FusionMethod::CombSum,
            "comb_mnz" => FusionMethod::CombMnz,
            _ => FusionMethod::Rrf,
        }
    }
}

static COMB_WARNED: Once = Once::new();

/// `k` is RRF's rank-damping constant; 60 is the conventional default.
pub fn fuse(method: FusionMethod, sources: &[Vec<Match>], k: f64) -> Vec<Match> {
    if matches!(method, FusionMethod::CombSum | FusionMethod::CombMnz) {
        COMB_WARNED.call_once(|| {
            tracing::warn!(method = ?method, "comb_sum/comb_mnz are not implemented, falling back to reciprocal rank fusion");
        });
    }
    reciprocal_rank_fusion(sources, k)
}

fn reciprocal_rank_fusion(sources: &[Vec<Match>], k: f64) -> Vec<Match> {
    let mut scored: IndexMap<String, (Match, f64)> = IndexMap::new();
    for source in sources {
        for (rank, m) in source.iter().enumerate() {
            let contribution = 1.0 / (k + (rank + 1) as f64);
            scored
                .entry(m.id.clone())
                .and_modify(|(_, score)| *score += contribution)
                .or_insert_with(|| (m.clone(), contribution));
        }
    }
    let mut merged: Vec<Match> = scored
        .into_values()
        .map(|(mut m, score)| {
            m.score = score;
            m
        })
        .collect();
    merged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(id: &str, score: f64) -> Match {
        Match { id: id.to_string(), text: id.to_string(), score, source_stage: "vector_retrieve".into(), metadata: Default::default() }
    }

    #[test]
    fn rrf_rewards_matches_ranked_highly_across_sources() {
        let a = vec![m("x", 0.9), m("y", 0.5), m("z", 0.1)];
        let b = vec![m("x", 0.2), m("z", 0.8)];
        let fused = fuse(FusionMethod::Rrf, &[a, b], 60.0);
        assert_eq!(fused[0].id, "x", "x is top-ranked in both sources");
        assert_eq!(fused.len(), 3);
    }

    #[test]
    fn comb_sum_degrades_to_rrf_without_panicking() {
        let a = vec![m("x", 1.0)];
        let fused = fuse(FusionMethod::CombSum, &[a], 60.0);
        assert_eq!(fused.len(), 1);
    }
}
