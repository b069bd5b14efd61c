//! Candidate ordering.
//!
//! Weighted selection samples without replacement using Efraimidis-Spirakis keys
//! (`u^(1/w)` for uniform `u`), so a node's chance of being picked first is
//! proportional to its weight. Candidates are pre-sorted by [`NodeId`] so equal
//! keys resolve deterministically.
//!
//! [`NodeId`]: crate::types::NodeId

use primitive_types::U256;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::node::NodeRecord;

/// How candidates are ordered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Weighted random sampling without replacement.
    #[default]
    Weighted,
    /// Weight descending, then node id ascending. Reproducible.
    Deterministic,
}

const WEI_PER_UNIT: u128 = 1_000_000_000_000_000_000;

/// Deposit factor `1 + ln(1 + deposit / 10^18)`.
fn deposit_factor(deposit: U256) -> f64 {
    let units = if deposit.bits() > 128 {
        f64::MAX
    } else {
        deposit.low_u128() as f64 / WEI_PER_UNIT as f64
    };
    1.0 + units.ln_1p()
}

/// Freshness factor, linear from 1.0 at zero lag down to 0.1 at `max_block_lag`.
fn block_lag_factor(lag: u64, max_block_lag: u64) -> f64 {
    if lag == 0 || max_block_lag == 0 {
        return 1.0;
    }
    let penalty = (lag as f64 / max_block_lag as f64).min(1.0);
    1.0 - 0.9 * penalty
}

/// Selection weight of `node` given the highest block seen across its chain.
#[must_use]
pub fn node_weight(node: &NodeRecord, chain_tip: u64, max_block_lag: u64) -> f64 {
    let lag = if node.last_seen_block == 0 { 0 } else { chain_tip.saturating_sub(node.last_seen_block) };
    f64::from(node.weight) *
        deposit_factor(node.deposit) *
        block_lag_factor(lag, max_block_lag) /
        (1.0 + f64::from(node.failure_count))
}

/// Orders `candidates` and returns at most `count` of them.
///
/// Falls back to a uniform shuffle when no candidate has a usable weight.
pub fn order_candidates<R: Rng>(
    mut candidates: Vec<NodeRecord>,
    count: usize,
    strategy: SelectionStrategy,
    max_block_lag: u64,
    rng: &mut R,
) -> Vec<NodeRecord> {
    candidates.sort_by(|a, b| a.id.cmp(&b.id));
    let tip = candidates.iter().map(|n| n.last_seen_block).max().unwrap_or(0);
    let weights: Vec<f64> =
        candidates.iter().map(|n| node_weight(n, tip, max_block_lag)).collect();
    let usable = weights.iter().any(|w| w.is_finite() && *w > 0.0);

    let mut keyed: Vec<(f64, NodeRecord)> = match (strategy, usable) {
        (SelectionStrategy::Deterministic, _) => weights.into_iter().zip(candidates).collect(),
        (SelectionStrategy::Weighted, true) => weights
            .into_iter()
            .zip(candidates)
            .map(|(w, node)| {
                let key = if w.is_finite() && w > 0.0 {
                    let u: f64 = rng.random_range(f64::EPSILON..1.0);
                    u.powf(1.0 / w)
                } else {
                    0.0
                };
                (key, node)
            })
            .collect(),
        (SelectionStrategy::Weighted, false) => {
            candidates.into_iter().map(|node| (rng.random::<f64>(), node)).collect()
        }
    };

    // Stable sort keeps NodeId order among equal keys.
    keyed.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
    keyed.into_iter().take(count).map(|(_, node)| node).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn node(url: &str, weight: u32) -> NodeRecord {
        let mut record = NodeRecord::new(1, url);
        record.weight = weight;
        record
    }

    #[test]
    fn test_weight_factors() {
        let base = node("https://a", 1);
        assert!((node_weight(&base, 0, 10) - 1.0).abs() < f64::EPSILON);

        let mut failing = base.clone();
        failing.failure_count = 3;
        assert!((node_weight(&failing, 0, 10) - 0.25).abs() < 1e-9);

        let mut staked = base.clone();
        staked.deposit = U256::exp10(18);
        assert!(node_weight(&staked, 0, 10) > 1.6);

        let mut lagging = base;
        lagging.last_seen_block = 90;
        assert!((node_weight(&lagging, 100, 10) - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_deterministic_order() {
        let nodes = vec![node("https://c", 1), node("https://b", 5), node("https://a", 1)];
        let mut rng = StdRng::seed_from_u64(1);
        let ordered = order_candidates(nodes, 3, SelectionStrategy::Deterministic, 10, &mut rng);
        let ids: Vec<&str> = ordered.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["https://b", "https://a", "https://c"]);
    }

    #[test]
    fn test_count_is_respected() {
        let nodes = (0..10).map(|i| node(&format!("https://n{i}"), 1)).collect();
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(order_candidates(nodes, 3, SelectionStrategy::Weighted, 10, &mut rng).len(), 3);
    }

    #[test]
    fn test_weighted_prefers_heavy_nodes() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut heavy_first = 0;
        for _ in 0..1000 {
            let nodes = vec![node("https://light", 1), node("https://heavy", 9)];
            let ordered = order_candidates(nodes, 1, SelectionStrategy::Weighted, 10, &mut rng);
            if ordered[0].id.as_str() == "https://heavy" {
                heavy_first += 1;
            }
        }
        assert!(heavy_first > 800, "heavy node picked first {heavy_first} times");
    }

    #[test]
    fn test_zero_weights_fall_back_to_uniform() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut seen_a = false;
        let mut seen_b = false;
        for _ in 0..200 {
            let nodes = vec![node("https://a", 0), node("https://b", 0)];
            let ordered = order_candidates(nodes, 1, SelectionStrategy::Weighted, 10, &mut rng);
            match ordered[0].id.as_str() {
                "https://a" => seen_a = true,
                _ => seen_b = true,
            }
        }
        assert!(seen_a && seen_b);
    }
}
