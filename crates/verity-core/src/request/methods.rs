//! Method to proof-strategy table per chain family.

use crate::types::{ChainFamily, ProofType};

/// Where a method names the block its answer is proven against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockPosition {
    /// The answer identifies its own block (by transaction or block hash).
    Fixed,
    /// Block parameter at this index; a missing parameter means `latest`.
    Param(usize),
    /// Always answered at the node's latest block.
    Latest,
}

/// Proof strategy for one method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodSpec {
    pub proof: ProofType,
    pub block: BlockPosition,
}

const fn spec(proof: ProofType, block: BlockPosition) -> Option<MethodSpec> {
    Some(MethodSpec { proof, block })
}

/// Looks up the proof strategy of `method` on a chain family.
///
/// Returns `None` when no proof strategy exists. Every method of a checkpoint
/// chain is attested the same way.
#[must_use]
pub fn lookup(family: ChainFamily, method: &str) -> Option<MethodSpec> {
    use BlockPosition::{Fixed, Latest, Param};

    match family {
        ChainFamily::Account => match method {
            "eth_getBalance" | "eth_getTransactionCount" => spec(ProofType::Account, Param(1)),
            "eth_getCode" => spec(ProofType::Code, Param(1)),
            "eth_getStorageAt" => spec(ProofType::Storage, Param(2)),
            "eth_getTransactionReceipt" => spec(ProofType::Receipt, Fixed),
            "eth_getTransactionByHash" => spec(ProofType::Transaction, Fixed),
            "eth_getBlockByNumber" => spec(ProofType::Block, Param(0)),
            "eth_getBlockByHash" => spec(ProofType::Block, Fixed),
            "eth_blockNumber" => spec(ProofType::Block, Latest),
            "eth_call" | "eth_estimateGas" => spec(ProofType::Execution, Param(1)),
            "in3_nodeList" => spec(ProofType::NodeList, Latest),
            _ => None,
        },
        ChainFamily::Utxo => match method {
            "getrawtransaction" => spec(ProofType::MerkleBlock, Fixed),
            "getblockheader" => spec(ProofType::UtxoHeader, Fixed),
            "getblockcount" => spec(ProofType::UtxoHeader, Latest),
            _ => None,
        },
        ChainFamily::ContentAddressed => match method {
            "ipfs_get" => spec(ProofType::Content, Fixed),
            _ => None,
        },
        ChainFamily::Checkpoint => spec(ProofType::Checkpoint, Latest),
    }
}
