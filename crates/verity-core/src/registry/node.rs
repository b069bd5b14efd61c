use chrono::{DateTime, Utc};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{
    config::SeedNode,
    types::{Address, ChainId, NodeId},
};

/// Node capability flags, as published in the registry's `props` field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeProps(u64);

impl NodeProps {
    /// Serves proofs.
    pub const PROOF: Self = Self(0x01);
    /// Can serve several chains.
    pub const MULTICHAIN: Self = Self(0x02);
    /// Keeps historical state.
    pub const ARCHIVE: Self = Self(0x04);
    /// Reachable over plain HTTP.
    pub const HTTP: Self = Self(0x08);
    /// Signs block-hash attestations.
    pub const SIGNER: Self = Self(0x40);

    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Proof-serving HTTP node, the default for configured seeds.
    #[must_use]
    pub const fn standard() -> Self {
        Self(Self::PROOF.0 | Self::HTTP.0)
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl fmt::Display for NodeProps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        for (flag, name) in [
            (Self::PROOF, "proof"),
            (Self::MULTICHAIN, "multichain"),
            (Self::ARCHIVE, "archive"),
            (Self::HTTP, "http"),
            (Self::SIGNER, "signer"),
        ] {
            if self.contains(flag) {
                names.push(name);
            }
        }
        if names.is_empty() {
            f.write_str("-")
        } else {
            f.write_str(&names.join("|"))
        }
    }
}

/// A candidate data-provider node and its reputation state.
///
/// Owned by the registry; callers only ever see clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub chain_id: ChainId,
    pub endpoint: String,
    pub signer: Option<Address>,
    pub props: NodeProps,
    /// Configured relative weight.
    pub weight: u32,
    pub deposit: U256,
    pub register_time: DateTime<Utc>,
    /// Highest block this node proved to us.
    pub last_seen_block: u64,
    pub failure_count: u32,
    pub consecutive_failures: u32,
    pub successes_since_decay: u32,
    /// Verification failures that implied dishonesty.
    pub verification_strikes: u32,
    pub total_requests: u64,
    pub blacklisted_until: Option<DateTime<Utc>>,
}

impl NodeRecord {
    /// Creates a fresh record with clean reputation.
    #[must_use]
    pub fn new(chain_id: ChainId, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        Self {
            id: NodeId::new(endpoint.clone()),
            chain_id,
            endpoint,
            signer: None,
            props: NodeProps::standard(),
            weight: 1,
            deposit: U256::zero(),
            register_time: Utc::now(),
            last_seen_block: 0,
            failure_count: 0,
            consecutive_failures: 0,
            successes_since_decay: 0,
            verification_strikes: 0,
            total_requests: 0,
            blacklisted_until: None,
        }
    }

    /// Creates a record from a configured seed.
    #[must_use]
    pub fn from_seed(chain_id: ChainId, seed: &SeedNode) -> Self {
        let mut record = Self::new(chain_id, seed.url.clone());
        record.signer = seed.signer;
        record.weight = seed.weight;
        record.deposit = seed.deposit;
        record.props = if seed.signer.is_some() {
            seed.props.union(NodeProps::SIGNER)
        } else {
            seed.props
        };
        record
    }

    /// Whether the node is excluded from selection at `now`.
    #[must_use]
    pub fn is_blacklisted_at(&self, now: DateTime<Utc>) -> bool {
        self.blacklisted_until.is_some_and(|until| now < until)
    }

    #[must_use]
    pub fn is_blacklisted(&self) -> bool {
        self.is_blacklisted_at(Utc::now())
    }
}
