//! Trust anchors and header-segment linking.
//!
//! Anchors of a chain always form one contiguous, hash-linked run of blocks,
//! seeded from a configured checkpoint (or a persisted snapshot) and extended
//! only by segments that link to it.
//!
//! ```text
//!  anchors:  [100]──[101]──[102]
//!  segment:         [101]──[102]──[103]──[104]     links at 102, commits 103..=104
//!  fork:            [101]──[102']─[103']─[104']    diverges at 102; replaces 102..
//!                                                  only with greater cumulative weight
//! ```
//!
//! A commit swaps the whole [`AnchorSet`] of a chain with
//! `ArcSwap::compare_and_swap`. A verifier that loses the race re-plans
//! against the newer set instead of overwriting it.

use arc_swap::ArcSwap;
use dashmap::DashMap;
use primitive_types::{H256, U256};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};

use super::VerificationError;
use crate::types::ChainId;

/// A block the client trusts as canonical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustAnchor {
    pub chain_id: ChainId,
    pub number: u64,
    pub hash: H256,
    /// Sum of header weights from the bootstrap checkpoint (exclusive).
    pub cumulative_weight: U256,
}

impl TrustAnchor {
    /// A bootstrap anchor with zero cumulative weight.
    #[must_use]
    pub fn checkpoint(chain_id: ChainId, number: u64, hash: H256) -> Self {
        Self { chain_id, number, hash, cumulative_weight: U256::zero() }
    }
}

/// A header that passed its family's individual validity checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkedHeader {
    pub number: u64,
    pub hash: H256,
    pub parent: H256,
    /// Fork-choice weight: 1 for account chains, work for PoW chains.
    pub weight: U256,
}

/// Immutable snapshot of one chain's anchors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnchorSet {
    anchors: BTreeMap<u64, TrustAnchor>,
}

impl AnchorSet {
    #[must_use]
    pub fn from_anchors(anchors: impl IntoIterator<Item = TrustAnchor>) -> Self {
        Self { anchors: anchors.into_iter().map(|a| (a.number, a)).collect() }
    }

    #[must_use]
    pub fn get(&self, number: u64) -> Option<&TrustAnchor> {
        self.anchors.get(&number)
    }

    #[must_use]
    pub fn tip(&self) -> Option<&TrustAnchor> {
        self.anchors.values().next_back()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrustAnchor> {
        self.anchors.values()
    }

    /// The `count` highest anchors, newest first.
    #[must_use]
    pub fn latest(&self, count: usize) -> Vec<TrustAnchor> {
        self.anchors.values().rev().take(count).copied().collect()
    }

    fn prune(&mut self, horizon: u64) {
        if let Some(tip) = self.tip().map(|a| a.number) {
            let keep_from = tip.saturating_sub(horizon);
            self.anchors = self.anchors.split_off(&keep_from);
        }
    }
}

/// A non-empty, contiguous, parent-linked run of headers.
#[derive(Debug, Clone)]
pub struct Segment {
    headers: Vec<LinkedHeader>,
}

impl Segment {
    /// Validates ordering and parent links.
    ///
    /// # Errors
    /// `Malformed` for empty, oversized or non-contiguous input; `Mismatch`
    /// when a header's parent hash is not the previous header's hash.
    pub fn new(headers: Vec<LinkedHeader>, max_len: usize) -> Result<Self, VerificationError> {
        if headers.is_empty() {
            return Err(VerificationError::malformed("empty header segment"));
        }
        if headers.len() > max_len {
            return Err(VerificationError::malformed(format!(
                "header segment of {} exceeds limit {max_len}",
                headers.len()
            )));
        }
        for pair in headers.windows(2) {
            if pair[0].number.checked_add(1) != Some(pair[1].number) {
                return Err(VerificationError::malformed(format!(
                    "headers {} and {} are not contiguous",
                    pair[0].number, pair[1].number
                )));
            }
            if pair[1].parent != pair[0].hash {
                return Err(VerificationError::mismatch(format!(
                    "header {} does not link to its parent",
                    pair[1].number
                )));
            }
        }
        Ok(Self { headers })
    }

    #[must_use]
    pub fn header(&self, number: u64) -> Option<&LinkedHeader> {
        let first = self.headers.first()?.number;
        self.headers.get(usize::try_from(number.checked_sub(first)?).ok()?)
    }

    #[must_use]
    pub fn tip(&self) -> &LinkedHeader {
        // non-empty by construction
        &self.headers[self.headers.len() - 1]
    }

    /// Headers in the segment above `number`.
    #[must_use]
    pub fn confirmations(&self, number: u64) -> u64 {
        self.tip().number.saturating_sub(number)
    }

    #[must_use]
    pub fn headers(&self) -> &[LinkedHeader] {
        &self.headers
    }
}

/// Outcome of linking a segment against an anchor snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LinkPlan {
    /// Confirmations the proving block has on the chain the client will trust.
    pub finality: u64,
    /// Replacement anchor set, when the segment adds or replaces anchors.
    pub next: Option<AnchorSet>,
    /// Lowest replaced height when the segment wins a fork.
    pub reorg_from: Option<u64>,
}

/// Links `segment` to `anchors` and plans the resulting anchor set.
///
/// # Errors
/// - `Unanchored` if no header or the first header's parent is an anchor
/// - `StaleFork` if the proving block sits on a fork that does not outweigh the anchors
/// - `Mismatch` if anchored ancestry contradicts existing anchors
pub(crate) fn plan_link(
    chain_id: ChainId,
    anchors: &AnchorSet,
    segment: &Segment,
    proving: u64,
    horizon: u64,
) -> Result<LinkPlan, VerificationError> {
    let headers = segment.headers();

    // Index of the first header above the link point, and the link's weight.
    let matched = headers
        .iter()
        .rposition(|h| anchors.get(h.number).is_some_and(|a| a.hash == h.hash));
    let (above_from, link_weight) = match matched {
        Some(k) => (k + 1, anchors.get(headers[k].number).map(|a| a.cumulative_weight).unwrap_or_default()),
        None => {
            let first = &headers[0];
            match first.number.checked_sub(1).and_then(|n| anchors.get(n)) {
                Some(parent) if parent.hash == first.parent => (0, parent.cumulative_weight),
                _ => return Err(VerificationError::Unanchored),
            }
        }
    };

    for h in &headers[..above_from] {
        if anchors.get(h.number).is_some_and(|a| a.hash != h.hash) {
            return Err(VerificationError::mismatch(format!(
                "header {} contradicts anchored ancestry",
                h.number
            )));
        }
    }

    let above = &headers[above_from..];
    let mut fresh = Vec::with_capacity(above.len());
    let mut weight = link_weight;
    for h in above {
        weight = weight.saturating_add(h.weight);
        fresh.push(TrustAnchor { chain_id, number: h.number, hash: h.hash, cumulative_weight: weight });
    }

    // Ancestors of the link anchor, with weights derived downwards.
    let mut ancestors = Vec::new();
    if let Some(k) = matched {
        let mut weight = link_weight;
        for pair in headers[..=k].windows(2).rev() {
            weight = weight.saturating_sub(pair[1].weight);
            let h = pair[0];
            if anchors.get(h.number).is_none() {
                ancestors.push(TrustAnchor { chain_id, number: h.number, hash: h.hash, cumulative_weight: weight });
            }
        }
    }

    let link_height = above.first().map_or(segment.tip().number, |h| h.number.saturating_sub(1));
    let conflicts = !above.is_empty() && anchors.tip().is_some_and(|tip| tip.number > link_height);
    let proving_anchored = proving <= link_height;

    if conflicts {
        let current = anchors.tip().map(|a| a.cumulative_weight).unwrap_or_default();
        if weight <= current {
            if proving_anchored {
                let tip = anchors.tip().map_or(proving, |a| a.number);
                return Ok(LinkPlan { finality: tip.saturating_sub(proving), next: None, reorg_from: None });
            }
            return Err(VerificationError::StaleFork);
        }

        let diverge = above[0].number;
        let mut next = AnchorSet::from_anchors(anchors.iter().copied().filter(|a| a.number < diverge));
        next.anchors.extend(ancestors.into_iter().map(|a| (a.number, a)));
        next.anchors.extend(fresh.into_iter().map(|a| (a.number, a)));
        next.prune(horizon);
        let finality = segment.confirmations(proving);
        return Ok(LinkPlan { finality, next: Some(next), reorg_from: Some(diverge) });
    }

    let tip_after = anchors.tip().map_or(0, |a| a.number).max(segment.tip().number);
    let finality = tip_after.saturating_sub(proving);

    if fresh.is_empty() && ancestors.is_empty() {
        return Ok(LinkPlan { finality, next: None, reorg_from: None });
    }

    let mut next = anchors.clone();
    next.anchors.extend(ancestors.into_iter().map(|a| (a.number, a)));
    next.anchors.extend(fresh.into_iter().map(|a| (a.number, a)));
    next.prune(horizon);
    if next == *anchors {
        return Ok(LinkPlan { finality, next: None, reorg_from: None });
    }
    Ok(LinkPlan { finality, next: Some(next), reorg_from: None })
}

/// Per-chain anchor sets, each behind its own `ArcSwap`.
#[derive(Default)]
pub struct TrustAnchorStore {
    chains: DashMap<ChainId, Arc<ArcSwap<AnchorSet>>>,
}

impl TrustAnchorStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, chain_id: ChainId) -> Arc<ArcSwap<AnchorSet>> {
        self.chains
            .entry(chain_id)
            .or_insert_with(|| Arc::new(ArcSwap::from_pointee(AnchorSet::default())))
            .clone()
    }

    /// Installs a bootstrap checkpoint if the chain has no anchors yet.
    pub fn seed(&self, anchor: TrustAnchor) {
        let slot = self.slot(anchor.chain_id);
        slot.rcu(|current| {
            if current.is_empty() {
                Arc::new(AnchorSet::from_anchors([anchor]))
            } else {
                Arc::clone(current)
            }
        });
    }

    /// Current anchor snapshot of a chain; empty for unknown chains.
    #[must_use]
    pub fn load(&self, chain_id: ChainId) -> Arc<AnchorSet> {
        self.chains.get(&chain_id).map_or_else(|| Arc::new(AnchorSet::default()), |s| s.load_full())
    }

    /// Replaces `current` with `next` unless another writer got there first.
    pub(crate) fn compare_and_swap(&self, chain_id: ChainId, current: &Arc<AnchorSet>, next: AnchorSet) -> bool {
        let slot = self.slot(chain_id);
        let previous = slot.compare_and_swap(current, Arc::new(next));
        Arc::ptr_eq(&previous, current)
    }

    #[must_use]
    pub fn tip(&self, chain_id: ChainId) -> Option<TrustAnchor> {
        self.load(chain_id).tip().copied()
    }

    /// Anchors of every chain, for persistence.
    #[must_use]
    pub fn snapshot(&self) -> Vec<TrustAnchor> {
        let mut ids: Vec<ChainId> = self.chains.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids.into_iter().flat_map(|id| self.load(id).iter().copied().collect::<Vec<_>>()).collect()
    }

    /// Replaces the anchors of every chain present in `anchors`.
    pub fn restore(&self, anchors: Vec<TrustAnchor>) {
        let mut by_chain: BTreeMap<ChainId, Vec<TrustAnchor>> = BTreeMap::new();
        for anchor in anchors {
            by_chain.entry(anchor.chain_id).or_default().push(anchor);
        }
        for (chain_id, anchors) in by_chain {
            self.slot(chain_id).store(Arc::new(AnchorSet::from_anchors(anchors)));
        }
    }
}
