//! Node registry: candidate nodes per chain, their reputation, and selection.
//!
//! # Concurrency
//!
//! Records live in one `DashMap` per chain, so an outcome report is a
//! read-modify-write on a single shard entry and reports for different nodes
//! never contend. Selection takes clones, never references, so it does not hold
//! shard locks while the dispatcher awaits responses.
//!
//! # Blacklisting
//!
//! | Trigger | Effect |
//! |---------|--------|
//! | any failed verification | blacklisted for `verification_blacklist_seconds` |
//! | proof mismatch | additionally counts a dishonesty strike |
//! | `transport_failure_threshold` consecutive transport errors/timeouts | blacklisted for `transport_blacklist_seconds` |
//! | blacklist expiry with `max_verification_strikes` strikes | evicted |

pub mod node;
pub mod nodelist;
pub mod penalty;
pub mod selection;

pub use node::{NodeProps, NodeRecord};
pub use nodelist::{NodeList, NodeListEntry, NodeListSource};
pub use penalty::{BlacklistState, NodeOutcome, PenaltyEffect, RegistryConfig};
pub use selection::SelectionStrategy;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::{rngs::StdRng, SeedableRng};
use std::{
    collections::HashSet,
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    metrics,
    proof::SignerDirectory,
    types::{Address, ChainDescriptor, ChainId, NodeId},
};

/// Registry errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RegistryError {
    #[error("unknown chain {0}")]
    UnknownChain(ChainId),

    #[error("chain {0} has no on-chain registry")]
    NoRegistry(ChainId),

    #[error("node list fetch failed: {0}")]
    Fetch(String),

    #[error("invalid node list: {0}")]
    InvalidNodeList(String),
}

/// Constraints applied on top of the blacklist when selecting candidates.
#[derive(Debug, Clone, Default)]
pub struct CandidateFilter {
    /// Nodes already tried by the current call.
    pub exclude: HashSet<NodeId>,
    /// Capabilities every candidate must have.
    pub required_props: NodeProps,
}

impl CandidateFilter {
    #[must_use]
    pub fn requiring(props: NodeProps) -> Self {
        Self { exclude: HashSet::new(), required_props: props }
    }
}

/// Result of applying a published node list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

struct ChainNodes {
    descriptor: ChainDescriptor,
    nodes: DashMap<NodeId, NodeRecord>,
}

/// Registry of candidate nodes for every configured chain.
pub struct NodeRegistry {
    chains: DashMap<ChainId, Arc<ChainNodes>>,
    config: ArcSwap<RegistryConfig>,
    rng: Mutex<StdRng>,
}

impl NodeRegistry {
    #[must_use]
    pub fn new(config: RegistryConfig) -> Self {
        let rng = match config.selection_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        Self { chains: DashMap::new(), config: ArcSwap::from_pointee(config), rng: Mutex::new(rng) }
    }

    /// Replaces the registry configuration. Lock-free for readers.
    pub fn update_config(&self, config: RegistryConfig) {
        self.config.store(Arc::new(config));
        info!("registry configuration updated");
    }

    #[must_use]
    pub fn get_config(&self) -> RegistryConfig {
        (**self.config.load()).clone()
    }

    /// Registers a chain and bootstraps it with `seeds` unless it already has nodes.
    pub fn register_chain(&self, descriptor: ChainDescriptor, seeds: Vec<NodeRecord>) {
        let chain_id = descriptor.id;
        let entry = self
            .chains
            .entry(chain_id)
            .or_insert_with(|| Arc::new(ChainNodes { descriptor, nodes: DashMap::new() }))
            .clone();

        if entry.nodes.is_empty() {
            let count = seeds.len();
            for seed in seeds {
                entry.nodes.insert(seed.id.clone(), seed);
            }
            debug!(chain = chain_id, seeds = count, "registry bootstrapped from seed list");
        }
    }

    /// Inserts or replaces a single record.
    ///
    /// # Errors
    /// Returns [`RegistryError::UnknownChain`] if the record's chain is not registered.
    pub fn insert(&self, record: NodeRecord) -> Result<(), RegistryError> {
        let chain = self.chain(record.chain_id)?;
        chain.nodes.insert(record.id.clone(), record);
        Ok(())
    }

    fn chain(&self, chain_id: ChainId) -> Result<Arc<ChainNodes>, RegistryError> {
        self.chains
            .get(&chain_id)
            .map(|c| Arc::clone(c.value()))
            .ok_or(RegistryError::UnknownChain(chain_id))
    }

    /// Descriptor of a registered chain.
    #[must_use]
    pub fn descriptor(&self, chain_id: ChainId) -> Option<ChainDescriptor> {
        self.chains.get(&chain_id).map(|c| c.descriptor.clone())
    }

    /// Returns up to `count` candidates in preference order.
    ///
    /// Blacklisted nodes are never returned, whatever their weight. Expired
    /// blacklists are cleared here, and nodes that exhausted their strikes are
    /// evicted.
    ///
    /// # Errors
    /// Returns [`RegistryError::UnknownChain`] for unregistered chains.
    pub fn select_candidates(
        &self,
        chain: &ChainDescriptor,
        count: usize,
        filter: &CandidateFilter,
    ) -> Result<Vec<NodeRecord>, RegistryError> {
        self.select_candidates_at(chain, count, filter, Utc::now())
    }

    pub(crate) fn select_candidates_at(
        &self,
        chain: &ChainDescriptor,
        count: usize,
        filter: &CandidateFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<NodeRecord>, RegistryError> {
        let nodes = self.chain(chain.id)?;
        let config = self.config.load();

        let mut evict = Vec::new();
        let mut eligible = Vec::new();
        for mut entry in nodes.nodes.iter_mut() {
            match penalty::expire(entry.value_mut(), &config, now) {
                BlacklistState::Active => continue,
                BlacklistState::Evict => {
                    evict.push(entry.key().clone());
                    continue;
                }
                BlacklistState::Released => {
                    info!(chain = chain.id, node = %entry.key(), "node blacklist expired");
                }
                BlacklistState::Clear => {}
            }
            let record = entry.value();
            if filter.exclude.contains(&record.id) ||
                !record.props.contains(filter.required_props)
            {
                continue;
            }
            eligible.push(record.clone());
        }

        for id in evict {
            if nodes.nodes.remove(&id).is_some() {
                warn!(chain = chain.id, node = %id, "evicted node after repeated verification failures");
                metrics::record_eviction(chain.id);
            }
        }

        let mut rng = self.rng.lock();
        let ordered = selection::order_candidates(
            eligible,
            count,
            config.selection,
            config.max_block_lag,
            &mut *rng,
        );

        debug!(
            chain = chain.id,
            requested = count,
            selected = ordered.len(),
            "selected candidate nodes"
        );
        Ok(ordered)
    }

    /// Applies a request outcome to one node's record.
    ///
    /// Unknown nodes are ignored; a node may have been evicted by a refresh
    /// while a call to it was in flight.
    pub fn report_outcome(&self, chain_id: ChainId, node: &NodeId, outcome: NodeOutcome) -> PenaltyEffect {
        let Ok(chain) = self.chain(chain_id) else {
            return PenaltyEffect::None;
        };
        let config = self.config.load();
        let Some(mut record) = chain.nodes.get_mut(node) else {
            return PenaltyEffect::None;
        };

        let effect = penalty::apply_outcome(record.value_mut(), outcome, &config, Utc::now());

        if let PenaltyEffect::Blacklisted { until } = effect {
            let reason = outcome.as_str();
            warn!(
                chain = chain_id,
                node = %node,
                reason = reason,
                failure_count = record.failure_count,
                until = %until,
                "node blacklisted"
            );
            metrics::record_blacklisting(chain_id, reason);
        } else {
            debug!(
                chain = chain_id,
                node = %node,
                outcome = outcome.as_str(),
                failure_count = record.failure_count,
                "recorded node outcome"
            );
        }
        effect
    }

    /// Blacklists a node for at least `duration`.
    ///
    /// Returns the effective end of the blacklist, or `None` for unknown nodes.
    pub fn blacklist(&self, chain_id: ChainId, node: &NodeId, duration: Duration) -> Option<DateTime<Utc>> {
        let chain = self.chain(chain_id).ok()?;
        let mut record = chain.nodes.get_mut(node)?;
        let until = penalty::blacklist(record.value_mut(), duration, Utc::now());
        info!(chain = chain_id, node = %node, until = %until, "node blacklisted manually");
        metrics::record_blacklisting(chain_id, "manual");
        Some(until)
    }

    /// Refreshes a chain's node set from its on-chain registry.
    ///
    /// # Errors
    /// Returns [`RegistryError::NoRegistry`] for chains without a registry
    /// contract, or the source's error when the lookup fails. On failure the
    /// current node set is left untouched.
    pub async fn refresh(
        &self,
        chain: &ChainDescriptor,
        source: &dyn NodeListSource,
    ) -> Result<RefreshSummary, RegistryError> {
        let Some(registry) = chain.registry.as_ref() else {
            return Err(RegistryError::NoRegistry(chain.id));
        };
        let list = source.fetch_node_list(chain).await?;
        if list.contract != registry.address {
            return Err(RegistryError::InvalidNodeList(format!(
                "list is for contract {:?}, expected {:?}",
                list.contract, registry.address
            )));
        }
        self.apply_node_list(chain.id, &list)
    }

    /// Replaces a chain's node set with a verified node list.
    ///
    /// Reputation of nodes that stay listed is preserved; unlisted nodes are
    /// removed. An empty list leaves the current set in place.
    ///
    /// # Errors
    /// Returns [`RegistryError::UnknownChain`] for unregistered chains.
    pub fn apply_node_list(&self, chain_id: ChainId, list: &NodeList) -> Result<RefreshSummary, RegistryError> {
        let chain = self.chain(chain_id)?;
        if list.nodes.is_empty() {
            warn!(chain = chain_id, "registry returned an empty node list, keeping current nodes");
            return Ok(RefreshSummary::default());
        }

        let mut summary = RefreshSummary::default();
        let fresh = list.records(chain_id);
        let listed: HashSet<NodeId> = fresh.iter().map(|r| r.id.clone()).collect();

        for record in fresh {
            match chain.nodes.get_mut(&record.id) {
                Some(mut existing) => {
                    existing.signer = record.signer;
                    existing.deposit = record.deposit;
                    existing.weight = record.weight;
                    existing.props = record.props;
                    existing.register_time = record.register_time;
                    summary.updated += 1;
                }
                None => {
                    chain.nodes.insert(record.id.clone(), record);
                    summary.added += 1;
                }
            }
        }

        let before = chain.nodes.len();
        chain.nodes.retain(|id, _| listed.contains(id));
        summary.removed = before - chain.nodes.len();

        info!(
            chain = chain_id,
            added = summary.added,
            updated = summary.updated,
            removed = summary.removed,
            block = list.last_block_number,
            "node registry refreshed"
        );
        Ok(summary)
    }

    /// All records of a chain, sorted by node id.
    #[must_use]
    pub fn nodes(&self, chain_id: ChainId) -> Vec<NodeRecord> {
        let Ok(chain) = self.chain(chain_id) else {
            return Vec::new();
        };
        let mut records: Vec<NodeRecord> = chain.nodes.iter().map(|e| e.value().clone()).collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    #[must_use]
    pub fn node(&self, chain_id: ChainId, node: &NodeId) -> Option<NodeRecord> {
        self.chain(chain_id).ok()?.nodes.get(node).map(|r| r.value().clone())
    }

    /// Signer addresses of non-blacklisted nodes, excluding `except`.
    #[must_use]
    pub fn signers(&self, chain_id: ChainId, except: Option<&NodeId>) -> Vec<Address> {
        let now = Utc::now();
        let mut signers: Vec<Address> = self
            .nodes(chain_id)
            .into_iter()
            .filter(|r| Some(&r.id) != except && !r.is_blacklisted_at(now))
            .filter_map(|r| r.signer)
            .collect();
        signers.sort();
        signers.dedup();
        signers
    }

    /// Every record across all chains, for persistence.
    #[must_use]
    pub fn snapshot(&self) -> Vec<NodeRecord> {
        let mut ids: Vec<ChainId> = self.chains.iter().map(|c| *c.key()).collect();
        ids.sort_unstable();
        ids.into_iter().flat_map(|id| self.nodes(id)).collect()
    }

    /// Restores persisted records, replacing seed records of the same chain.
    ///
    /// Records for unregistered chains are skipped.
    pub fn restore(&self, records: Vec<NodeRecord>) -> usize {
        let mut by_chain: std::collections::HashMap<ChainId, Vec<NodeRecord>> =
            std::collections::HashMap::new();
        for record in records {
            by_chain.entry(record.chain_id).or_default().push(record);
        }

        let mut restored = 0;
        for (chain_id, records) in by_chain {
            let Ok(chain) = self.chain(chain_id) else {
                warn!(chain = chain_id, "skipping persisted nodes for unconfigured chain");
                continue;
            };
            chain.nodes.clear();
            for record in records {
                chain.nodes.insert(record.id.clone(), record);
                restored += 1;
            }
        }
        restored
    }
}

impl SignerDirectory for NodeRegistry {
    fn is_registered_signer(&self, chain_id: ChainId, signer: &Address) -> bool {
        let Ok(chain) = self.chain(chain_id) else {
            return false;
        };
        let now = Utc::now();
        let found = chain.nodes.iter().any(|r| r.signer.as_ref() == Some(signer) && !r.is_blacklisted_at(now));
        found
    }

    fn signer_of(&self, chain_id: ChainId, node: &NodeId) -> Option<Address> {
        let chain = self.chain(chain_id).ok()?;
        let signer = chain.nodes.get(node).and_then(|r| r.signer);
        signer
    }
}
