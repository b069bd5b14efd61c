//! On-chain node list format and the commitment the registry contract stores.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use primitive_types::{H256, U256};
use rlp::RlpStream;
use serde::{Deserialize, Serialize};

use super::{node::NodeProps, NodeRecord, RegistryError};
use crate::{
    crypto::keccak256,
    types::{Address, ChainDescriptor, ChainId},
};

/// One registered node as published by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeListEntry {
    pub url: String,
    /// Signer address of the node.
    pub address: Address,
    pub deposit: U256,
    /// Unix seconds.
    pub register_time: u64,
    pub props: u64,
    pub weight: u32,
}

/// The result of `in3_nodeList`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeList {
    pub nodes: Vec<NodeListEntry>,
    pub contract: Address,
    #[serde(default)]
    pub last_block_number: u64,
}

fn trimmed_be(value: U256) -> Vec<u8> {
    let mut buf = [0u8; 32];
    value.to_big_endian(&mut buf);
    let first = buf.iter().position(|b| *b != 0).unwrap_or(32);
    buf[first..].to_vec()
}

impl NodeList {
    /// `keccak256(rlp([[url, address, deposit, registerTime, props, weight], ...]))`.
    ///
    /// This is the value the registry contract keeps in its node-list slot.
    #[must_use]
    pub fn commitment(&self) -> H256 {
        let mut stream = RlpStream::new_list(self.nodes.len());
        for node in &self.nodes {
            stream.begin_list(6);
            stream.append(&node.url);
            stream.append(&node.address.as_bytes().to_vec());
            stream.append(&trimmed_be(node.deposit));
            stream.append(&node.register_time);
            stream.append(&node.props);
            stream.append(&node.weight);
        }
        keccak256(&stream.out())
    }

    /// Converts the published entries into fresh registry records.
    #[must_use]
    pub fn records(&self, chain_id: ChainId) -> Vec<NodeRecord> {
        self.nodes
            .iter()
            .map(|entry| {
                let mut record = NodeRecord::new(chain_id, entry.url.clone());
                record.signer = Some(entry.address);
                record.deposit = entry.deposit;
                record.weight = entry.weight;
                record.props = NodeProps::from_bits(entry.props);
                record.register_time = i64::try_from(entry.register_time)
                    .ok()
                    .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
                    .unwrap_or_else(Utc::now);
                record
            })
            .collect()
    }
}

/// Fetches a verified node list for a chain.
///
/// The dispatcher implements this by sending `in3_nodeList` through the normal
/// verify pipeline, so the registry never sees unverified lists.
#[async_trait]
pub trait NodeListSource: Send + Sync {
    async fn fetch_node_list(&self, chain: &ChainDescriptor) -> Result<NodeList, RegistryError>;
}
