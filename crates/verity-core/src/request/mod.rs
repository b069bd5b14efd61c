//! Request building: proof strategy selection and wire encoding.
//!
//! [`RequestBuilder::prepare`] turns a caller's `(chain, method, params)` into
//! an immutable [`RpcRequest`] with its proof type and required finality;
//! [`RequestBuilder::build`] binds it to concrete nodes as JSON-RPC bodies
//! carrying the `in3` verification object:
//!
//! ```text
//! {"jsonrpc":"2.0","id":7,"method":"eth_getBalance","params":[..],
//!  "in3":{"chainId":"0x1","verification":"proof","proofType":"account","finality":6,
//!         "verifiedHashes":[{"block":"0x10","hash":"0x.."}],"signers":["0x.."]}}
//! ```

pub mod methods;

pub use methods::{BlockPosition, MethodSpec};

use arc_swap::ArcSwap;
use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use thiserror::Error;

use crate::{
    config::ChainConfig,
    proof::ProofVerifier,
    registry::{NodeProps, NodeRecord, NodeRegistry},
    types::{
        CallOptions, ChainDescriptor, ChainFamily, ChainId, JsonRpcRequest, ProofType, RpcRequest,
        VerificationMeta, VerifiedHash, WireRequest,
    },
    utils::{format_quantity, BlockParameter, BlockRef, BlockTag, HexError},
};

/// Request building errors. Both are fatal for the call.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BuildError {
    #[error("no proof strategy for {method} on {chain}")]
    UnsupportedMethod { chain: String, method: String },

    #[error("invalid params for {method}: {reason}")]
    InvalidParams { method: String, reason: String },

    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Default confirmations required per chain family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalityDefaults {
    #[serde(default)]
    pub account: u64,
    #[serde(default = "default_utxo_finality")]
    pub utxo: u64,
    #[serde(default)]
    pub content_addressed: u64,
    #[serde(default)]
    pub checkpoint: u64,
}

fn default_utxo_finality() -> u64 {
    6
}

impl Default for FinalityDefaults {
    fn default() -> Self {
        Self { account: 0, utxo: default_utxo_finality(), content_addressed: 0, checkpoint: 0 }
    }
}

impl FinalityDefaults {
    #[must_use]
    pub fn for_family(&self, family: ChainFamily) -> u64 {
        match family {
            ChainFamily::Account => self.account,
            ChainFamily::Utxo => self.utxo,
            ChainFamily::ContentAddressed => self.content_addressed,
            ChainFamily::Checkpoint => self.checkpoint,
        }
    }
}

/// The block a request's answer must be proven against, if it names one.
///
/// # Errors
/// Returns [`HexError`] for an unparseable block parameter.
pub fn block_ref(request: &RpcRequest) -> Result<Option<BlockRef>, HexError> {
    let Some(spec) = methods::lookup(request.chain.family, &request.method) else {
        return Ok(None);
    };
    match spec.block {
        BlockPosition::Fixed => Ok(None),
        BlockPosition::Latest => Ok(Some(BlockRef::Tag(BlockTag::Latest))),
        BlockPosition::Param(index) => BlockParameter::from_param(request.param(index)).map(Some),
    }
}

/// Builds requests for every configured chain.
pub struct RequestBuilder {
    finality: ArcSwap<FinalityDefaults>,
    chain_finality: DashMap<ChainId, u64>,
    verifier: Arc<ProofVerifier>,
    registry: Arc<NodeRegistry>,
    next_id: AtomicU64,
}

impl RequestBuilder {
    #[must_use]
    pub fn new(finality: FinalityDefaults, verifier: Arc<ProofVerifier>, registry: Arc<NodeRegistry>) -> Self {
        Self {
            finality: ArcSwap::from_pointee(finality),
            chain_finality: DashMap::new(),
            verifier,
            registry,
            next_id: AtomicU64::new(1),
        }
    }

    /// Records a chain's finality override, if it has one.
    pub fn configure_chain(&self, chain: &ChainConfig) {
        match chain.finality {
            Some(finality) => {
                self.chain_finality.insert(chain.id, finality);
            }
            None => {
                self.chain_finality.remove(&chain.id);
            }
        }
    }

    pub fn update_finality_defaults(&self, finality: FinalityDefaults) {
        self.finality.store(Arc::new(finality));
    }

    /// Finality applied when the caller does not override it.
    #[must_use]
    pub fn default_finality(&self, chain: &ChainDescriptor) -> u64 {
        self.chain_finality
            .get(&chain.id)
            .map_or_else(|| self.finality.load().for_family(chain.family), |f| *f)
    }

    /// Resolves the proof strategy and finality of a call.
    ///
    /// # Errors
    /// [`BuildError::UnsupportedMethod`] when no proof strategy exists (or an
    /// execution result is requested with no execution verifier registered),
    /// [`BuildError::InvalidParams`] for an unparseable block parameter.
    pub fn prepare(
        &self,
        chain: Arc<ChainDescriptor>,
        method: &str,
        params: Vec<Value>,
        options: &CallOptions,
    ) -> Result<RpcRequest, BuildError> {
        let unsupported = || BuildError::UnsupportedMethod { chain: chain.to_string(), method: method.to_string() };

        let spec = methods::lookup(chain.family, method).ok_or_else(unsupported)?;
        let proof_type = match spec.proof {
            ProofType::Execution if !self.verifier.has_execution_verifier() => return Err(unsupported()),
            ProofType::Checkpoint if self.verifier.uses_zk_proofs(chain.id) => ProofType::ZkProof,
            other => other,
        };
        if let BlockPosition::Param(index) = spec.block {
            BlockParameter::from_param(params.get(index))
                .map_err(|e| BuildError::InvalidParams { method: method.to_string(), reason: e.to_string() })?;
        }

        let finality = options.finality.unwrap_or_else(|| self.default_finality(&chain));
        Ok(RpcRequest { method: method.to_string(), params, chain, proof_type, finality })
    }

    /// Capabilities a node needs to answer `request`.
    ///
    /// Proofs are always requested; queries for blocks below the anchor
    /// horizon also need an archive node.
    #[must_use]
    pub fn required_props(&self, request: &RpcRequest) -> NodeProps {
        let mut props = NodeProps::PROOF;
        if let Ok(Some(BlockRef::Number(number))) = block_ref(request) {
            let horizon = self.verifier.trust_config().anchor_horizon;
            let tip = self.verifier.anchors().tip(request.chain.id).map_or(0, |a| a.number);
            if tip.saturating_sub(number) > horizon {
                props = props.union(NodeProps::ARCHIVE);
            }
        }
        props
    }

    fn meta(&self, request: &RpcRequest, node: &NodeRecord) -> VerificationMeta {
        let chain_id = request.chain.id;
        let hints = self.verifier.trust_config().verified_hash_hints;
        let verified_hashes = match request.chain.family {
            ChainFamily::Account | ChainFamily::Utxo => self
                .verifier
                .anchors()
                .load(chain_id)
                .latest(hints)
                .into_iter()
                .map(|a| VerifiedHash::new(a.number, a.hash))
                .collect(),
            ChainFamily::ContentAddressed | ChainFamily::Checkpoint => Vec::new(),
        };
        let required = self.verifier.required_signatures(chain_id);
        let signers = if required > 0 {
            self.registry.signers(chain_id, Some(&node.id)).into_iter().take(required).collect()
        } else {
            Vec::new()
        };
        VerificationMeta {
            chain_id: format_quantity(chain_id),
            verification: "proof".to_string(),
            proof_type: request.proof_type,
            finality: request.finality,
            verified_hashes,
            signers,
        }
    }

    /// Encodes `request` once per node, each with a fresh request id.
    ///
    /// # Errors
    /// [`BuildError::Encode`] if the body cannot be serialized.
    pub fn build(&self, request: &Arc<RpcRequest>, nodes: &[NodeRecord]) -> Result<Vec<WireRequest>, BuildError> {
        nodes
            .iter()
            .map(|node| {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let envelope = JsonRpcRequest {
                    jsonrpc: "2.0".to_string(),
                    id,
                    method: request.method.clone(),
                    params: request.params.clone(),
                    in3: Some(self.meta(request, node)),
                };
                Ok(WireRequest {
                    id,
                    node: node.id.clone(),
                    endpoint: node.endpoint.clone(),
                    body: Bytes::from(serde_json::to_vec(&envelope)?),
                    request: Arc::clone(request),
                })
            })
            .collect()
    }
}
