//! Typed view of the `in3.proof` object carried by node responses.

use primitive_types::H256;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::HashMap;

use crate::{
    crypto::RecoverableSignature,
    types::Address,
    utils::hex::{parse_bytes, value_to_u64},
};

/// Hex-encoded bytes on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HexBytes(pub Vec<u8>);

impl<'de> Deserialize<'de> for HexBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_bytes(&s).map(Self).map_err(serde::de::Error::custom)
    }
}

impl AsRef<[u8]> for HexBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A quantity given either as a hex string or a JSON number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Quantity(pub u64);

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        value_to_u64(&value).map(Self).map_err(serde::de::Error::custom)
    }
}

/// Proof payload, tagged by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProofPayload {
    AccountProof(AccountProof),
    ReceiptProof(ReceiptProof),
    TransactionProof(TransactionProof),
    BlockProof(BlockProof),
    MerkleBlockProof(MerkleBlockProof),
    ContentProof(ContentProof),
    CheckpointProof(CheckpointProof),
    ZkProof(ZkProof),
}

impl ProofPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AccountProof(_) => "accountProof",
            Self::ReceiptProof(_) => "receiptProof",
            Self::TransactionProof(_) => "transactionProof",
            Self::BlockProof(_) => "blockProof",
            Self::MerkleBlockProof(_) => "merkleBlockProof",
            Self::ContentProof(_) => "contentProof",
            Self::CheckpointProof(_) => "checkpointProof",
            Self::ZkProof(_) => "zkProof",
        }
    }
}

/// State proof for one or more accounts.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountProof {
    /// RLP headers, ascending and contiguous, containing the proving block.
    pub headers: Vec<HexBytes>,
    pub block: Quantity,
    /// Keyed by account address.
    pub accounts: HashMap<String, AccountEntry>,
    #[serde(default)]
    pub signatures: Vec<RecoverableSignature>,
}

impl AccountProof {
    /// Looks up the entry for `address`, whatever the key's hex casing.
    pub fn account(&self, address: &Address) -> Option<&AccountEntry> {
        self.accounts.iter().find_map(|(key, entry)| {
            let bytes = parse_bytes(key).ok()?;
            (bytes.len() == 20 && Address::from_slice(&bytes) == *address).then_some(entry)
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountEntry {
    #[serde(default)]
    pub account_proof: Vec<HexBytes>,
    #[serde(default)]
    pub storage_proof: Vec<StorageEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageEntry {
    pub key: String,
    #[serde(default)]
    pub proof: Vec<HexBytes>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptProof {
    pub headers: Vec<HexBytes>,
    pub block: Quantity,
    pub tx_index: Quantity,
    /// Receipt trie branch.
    pub merkle_proof: Vec<HexBytes>,
    /// Transaction trie branch for the same index.
    pub tx_proof: Vec<HexBytes>,
    #[serde(default)]
    pub signatures: Vec<RecoverableSignature>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionProof {
    pub headers: Vec<HexBytes>,
    pub block: Quantity,
    pub tx_index: Quantity,
    pub merkle_proof: Vec<HexBytes>,
    #[serde(default)]
    pub signatures: Vec<RecoverableSignature>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockProof {
    pub headers: Vec<HexBytes>,
    pub block: Quantity,
    #[serde(default)]
    pub signatures: Vec<RecoverableSignature>,
}

/// UTXO header segment plus an optional transaction Merkle branch.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerkleBlockProof {
    /// 80-byte headers.
    pub headers: Vec<HexBytes>,
    /// Height of the first header.
    pub height: Quantity,
    /// Height of the proving block.
    pub block: Quantity,
    #[serde(default)]
    pub tx_index: Option<Quantity>,
    /// Sibling hashes from the leaf upwards, in display byte order.
    #[serde(default)]
    pub merkle_branch: Vec<String>,
    #[serde(default)]
    pub signatures: Vec<RecoverableSignature>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentProof {
    #[serde(default)]
    pub signatures: Vec<RecoverableSignature>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CheckpointRef {
    pub block: Quantity,
    pub hash: H256,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckpointProof {
    pub checkpoint: CheckpointRef,
    #[serde(default)]
    pub signatures: Vec<RecoverableSignature>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZkProof {
    pub checkpoint: CheckpointRef,
    pub verifier_key: HexBytes,
    #[serde(default)]
    pub public_inputs: Vec<HexBytes>,
    pub proof: HexBytes,
}
