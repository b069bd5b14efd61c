//! Integration tests for node selection and reputation.
//!
//! These tests verify that:
//! - Blacklisted nodes are never selected, whatever their weight
//! - Selection never returns a node twice or more nodes than asked for
//! - Repeated transport failures blacklist a node, a single one does not

use chrono::{Duration as ChronoDuration, Utc};
use proptest::prelude::*;
use verity_core::{
    registry::{CandidateFilter, NodeOutcome, NodeRecord, NodeRegistry, PenaltyEffect, RegistryConfig},
    types::{ChainDescriptor, ChainFamily, NodeId},
};

fn descriptor() -> ChainDescriptor {
    ChainDescriptor::new(1, "testnet", ChainFamily::Account)
}

fn seeded(nodes: &[(u32, bool)], config: RegistryConfig) -> NodeRegistry {
    let registry = NodeRegistry::new(config);
    let until = Utc::now() + ChronoDuration::hours(1);
    let seeds = nodes
        .iter()
        .enumerate()
        .map(|(i, (weight, blacklisted))| {
            let mut record = NodeRecord::new(1, format!("http://n{i}.node.test"));
            record.weight = *weight;
            if *blacklisted {
                record.blacklisted_until = Some(until);
            }
            record
        })
        .collect();
    registry.register_chain(descriptor(), seeds);
    registry
}

proptest! {
    #[test]
    fn prop_blacklisted_nodes_are_never_selected(
        nodes in prop::collection::vec((1u32..1_000, any::<bool>()), 1..16),
        count in 1usize..16,
        seed in any::<u64>(),
    ) {
        let config = RegistryConfig { selection_seed: Some(seed), ..RegistryConfig::default() };
        let registry = seeded(&nodes, config);

        let selected = registry.select_candidates(&descriptor(), count, &CandidateFilter::default()).unwrap();

        let eligible = nodes.iter().filter(|(_, blacklisted)| !blacklisted).count();
        prop_assert_eq!(selected.len(), count.min(eligible));
        prop_assert!(selected.iter().all(|node| !node.is_blacklisted()));

        let mut ids: Vec<_> = selected.iter().map(|node| node.id.clone()).collect();
        ids.sort();
        ids.dedup();
        prop_assert_eq!(ids.len(), selected.len());
    }
}

#[test]
fn test_excluded_nodes_are_skipped() {
    let registry = seeded(&[(1, false), (1, false), (1, false)], RegistryConfig::default());
    let mut filter = CandidateFilter::default();
    filter.exclude.insert(NodeId::new("http://n0.node.test"));
    filter.exclude.insert(NodeId::new("http://n2.node.test"));

    let selected = registry.select_candidates(&descriptor(), 3, &filter).unwrap();
    assert_eq!(selected.len(), 1);
    assert_eq!(selected[0].id.as_str(), "http://n1.node.test");
}

#[test]
fn test_transport_failures_blacklist_at_threshold() {
    let config = RegistryConfig::default();
    let threshold = config.transport_failure_threshold;
    let registry = seeded(&[(1, false)], config);
    let node = NodeId::new("http://n0.node.test");

    for _ in 1..threshold {
        assert_eq!(registry.report_outcome(1, &node, NodeOutcome::TransportError), PenaltyEffect::None);
    }
    let effect = registry.report_outcome(1, &node, NodeOutcome::Timeout);
    assert!(matches!(effect, PenaltyEffect::Blacklisted { .. }));
    assert!(registry.select_candidates(&descriptor(), 1, &CandidateFilter::default()).unwrap().is_empty());
}

#[test]
fn test_success_resets_consecutive_failures() {
    let config = RegistryConfig::default();
    let threshold = config.transport_failure_threshold;
    let registry = seeded(&[(1, false)], config);
    let node = NodeId::new("http://n0.node.test");

    for _ in 0..3 {
        for _ in 1..threshold {
            registry.report_outcome(1, &node, NodeOutcome::Timeout);
        }
        registry.report_outcome(1, &node, NodeOutcome::Success { block: Some(20) });
    }

    let record = registry.node(1, &node).unwrap();
    assert!(!record.is_blacklisted());
    assert_eq!(record.last_seen_block, 20);
}
