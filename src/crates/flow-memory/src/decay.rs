//! Time-decay ranking (Open Question resolution, §9): entries are scored
//! by `exp(-age_days * ln2 / half_life_days)`, documented here at
//! half-life=30 with ages 0/30/60 yielding 1.0/0.5/0.25.

use crate::types::Turn;
use chrono::{DateTime, Utc};

pub fn decay_score(age_days: f64, half_life_days: f64) -> f64 {
    (-age_days * std::f64::consts::LN_2 / half_life_days).exp()
}

/// Ranks `turns` by decay score (most relevant first) and takes the top-K.
pub fn rank_by_decay(turns: &[Turn], half_life_days: f64, top_k: usize, now: DateTime<Utc>) -> Vec<Turn> {
    let mut scored: Vec<(f64, &Turn)> = turns.iter().map(|t| (decay_score(t.age_days(now), half_life_days), t)).collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().take(top_k).map(|(_, t)| t.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_life_thirty_days_matches_documented_values() {
        assert!((decay_score(0.0, 30.0) - 1.0).abs() < 1e-9);
        assert!((decay_score(30.0, 30.0) - 0.5).abs() < 1e-9);
        assert!((decay_score(60.0, 30.0) - 0.25).abs() < 1e-9);
    }
}
