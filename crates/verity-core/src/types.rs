//! Core types shared by the registry, builder, verifier, cache and dispatcher.

use primitive_types::{H160, H256};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt, sync::Arc, time::Duration};

use crate::utils::hex::format_quantity;

/// 20-byte account / signer address.
pub type Address = H160;

/// Numeric chain identifier (EIP-155 style for account chains).
pub type ChainId = u64;

/// Proof scheme family a chain belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainFamily {
    /// Account-based chains with Merkle-Patricia state tries.
    Account,
    /// UTXO chains with proof-of-work headers and Merkle blocks.
    Utxo,
    /// Content-addressed storage networks.
    ContentAddressed,
    /// Chains attested by committee signatures or zero-knowledge proofs.
    Checkpoint,
}

impl ChainFamily {
    /// Returns a static string representation for logs and metrics labels.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Account => "account",
            Self::Utxo => "utxo",
            Self::ContentAddressed => "content_addressed",
            Self::Checkpoint => "checkpoint",
        }
    }
}

impl fmt::Display for ChainFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// On-chain node registry location for chains that publish their node list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistryContract {
    /// Registry contract address.
    pub address: Address,
    /// Storage slot holding `keccak256(rlp(node list))`.
    #[serde(default)]
    pub nodelist_slot: H256,
}

/// Identifies a configured target chain. Immutable once configured.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainDescriptor {
    pub id: ChainId,
    pub name: String,
    pub family: ChainFamily,
    #[serde(default)]
    pub registry: Option<RegistryContract>,
}

impl ChainDescriptor {
    #[must_use]
    pub fn new(id: ChainId, name: impl Into<String>, family: ChainFamily) -> Self {
        Self { id, name: name.into(), family, registry: None }
    }

    #[must_use]
    pub fn with_registry(mut self, registry: RegistryContract) -> Self {
        self.registry = Some(registry);
        self
    }
}

impl fmt::Display for ChainDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.id)
    }
}

/// Node identity: the node's endpoint URL, unique per chain.
///
/// Ordering is lexicographic and is used as the final tie-break everywhere
/// a deterministic choice between nodes is needed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self(endpoint.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Proof strategy requested from a node for a given method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProofType {
    /// Account state: balance or nonce.
    Account,
    /// Contract storage slot.
    Storage,
    /// Contract bytecode.
    Code,
    /// Transaction receipt via the receipts trie.
    Receipt,
    /// Transaction via the transactions trie.
    Transaction,
    /// Block header or block number.
    Block,
    /// Execution result, checked by a registered execution verifier.
    Execution,
    /// Registry node list via contract storage.
    NodeList,
    /// UTXO transaction inclusion via a Merkle branch.
    MerkleBlock,
    /// UTXO header or height.
    UtxoHeader,
    /// Content-addressed payload with signer attestations.
    Content,
    /// Committee-signed checkpoint.
    Checkpoint,
    /// Zero-knowledge proof checked by a registered proof system.
    ZkProof,
}

impl ProofType {
    /// Returns a static string representation for logs and metrics labels.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Account => "account",
            Self::Storage => "storage",
            Self::Code => "code",
            Self::Receipt => "receipt",
            Self::Transaction => "transaction",
            Self::Block => "block",
            Self::Execution => "execution",
            Self::NodeList => "nodeList",
            Self::MerkleBlock => "merkleBlock",
            Self::UtxoHeader => "utxoHeader",
            Self::Content => "content",
            Self::Checkpoint => "checkpoint",
            Self::ZkProof => "zkProof",
        }
    }
}

/// Per-call overrides supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Required confirmations; the chain family default applies when unset.
    pub finality: Option<u64>,
    /// Replacement rounds after the first one.
    pub max_retries: Option<u32>,
    /// Overall call budget.
    pub timeout: Option<Duration>,
}

impl CallOptions {
    #[must_use]
    pub fn finality(mut self, finality: u64) -> Self {
        self.finality = Some(finality);
        self
    }

    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A logical RPC call bound to a chain, proof strategy and finality. Immutable.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    pub method: String,
    pub params: Vec<Value>,
    pub chain: Arc<ChainDescriptor>,
    pub proof_type: ProofType,
    pub finality: u64,
}

impl RpcRequest {
    /// Returns the positional parameter at `index`, if present.
    #[must_use]
    pub fn param(&self, index: usize) -> Option<&Value> {
        self.params.get(index)
    }

    /// Returns the positional parameter at `index` as a string, if it is one.
    #[must_use]
    pub fn param_str(&self, index: usize) -> Option<&str> {
        self.params.get(index).and_then(Value::as_str)
    }
}

/// An [`RpcRequest`] bound to one node with a unique request id.
#[derive(Debug, Clone)]
pub struct WireRequest {
    pub id: u64,
    pub node: NodeId,
    pub endpoint: String,
    pub body: bytes::Bytes,
    pub request: Arc<RpcRequest>,
}

/// A parsed node response that has not been verified yet.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub node: NodeId,
    pub id: u64,
    pub result: Value,
    pub proof: Option<Value>,
}

/// A value that passed a proof check against trusted chain state.
///
/// Only the proof verifier can construct one; there is no public constructor
/// and no `Deserialize` implementation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedResult {
    value: Value,
    proving_block_hash: H256,
    proving_block_number: u64,
    verified_at: u64,
    chain_id: ChainId,
    node: NodeId,
}

impl VerifiedResult {
    pub(crate) fn new(
        value: Value,
        proving_block_hash: H256,
        proving_block_number: u64,
        chain_id: ChainId,
        node: NodeId,
    ) -> Self {
        let verified_at = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default();
        Self { value, proving_block_hash, proving_block_number, verified_at, chain_id, node }
    }

    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        self.value
    }

    #[must_use]
    pub fn proving_block_hash(&self) -> H256 {
        self.proving_block_hash
    }

    #[must_use]
    pub fn proving_block_number(&self) -> u64 {
        self.proving_block_number
    }

    /// Unix timestamp (seconds) of the successful verification.
    #[must_use]
    pub fn verified_at(&self) -> u64 {
        self.verified_at
    }

    #[must_use]
    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    /// Node whose response produced this result.
    #[must_use]
    pub fn node(&self) -> &NodeId {
        &self.node
    }
}

/// JSON-RPC 2.0 request envelope with the verification extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    pub params: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in3: Option<VerificationMeta>,
}

/// The `in3` object attached to outgoing requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerificationMeta {
    /// Hex quantity chain id.
    pub chain_id: String,
    /// Always `"proof"`.
    pub verification: String,
    pub proof_type: ProofType,
    pub finality: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub verified_hashes: Vec<VerifiedHash>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signers: Vec<Address>,
}

/// A trusted block the node may link its header segment to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerifiedHash {
    pub block: String,
    pub hash: H256,
}

impl VerifiedHash {
    #[must_use]
    pub fn new(block: u64, hash: H256) -> Self {
        Self { block: format_quantity(block), hash }
    }
}

/// JSON-RPC 2.0 response envelope with the verification extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
    #[serde(default)]
    pub in3: Option<ResponseMeta>,
}

/// JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// The `in3` object attached to node responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    #[serde(default)]
    pub proof: Option<Value>,
    #[serde(default)]
    pub last_node_list: Option<u64>,
}
