//! Proof verification and trust anchors.
//!
//! # Flow
//!
//! ```text
//! RawResponse ──► payload (in3.proof) ──► family verifier ──► Proven
//!                                          account | utxo |     │
//!                                          content | checkpoint │
//!                                                               ▼
//!                           anchors::plan_link ──► compare_and_swap ──► finality check
//!                                 │ Unanchored                              │
//!                                 ▼                                         ▼
//!                           block-hash attestations                 Verification
//! ```
//!
//! A family verifier proves the returned value against a header (or a signed
//! checkpoint). The header is then tied to trust: account and UTXO headers
//! through a segment that links to the chain's [`TrustAnchorStore`], or through
//! enough registered signers when the chain allows attestations. Checkpoint and
//! content proofs are final on their own.
//!
//! The verifier never trusts a value it has not re-derived, and a
//! [`VerifiedResult`] cannot be built anywhere else.

pub mod anchors;
pub mod attestation;
pub mod checkpoint;
pub mod content;
pub mod error;
pub mod eth;
pub mod mpt;
pub mod payload;
pub mod utxo;

pub use anchors::{AnchorSet, LinkedHeader, Segment, TrustAnchor, TrustAnchorStore};
pub use attestation::attestation_digest;
pub use checkpoint::checkpoint_digest;
pub use error::VerificationError;
pub use payload::ProofPayload;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use primitive_types::H256;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt, sync::Arc};
use tracing::{debug, info, warn};

use crate::{
    config::{ChainConfig, CommitteeConfig},
    crypto::RecoverableSignature,
    metrics,
    types::{Address, ChainFamily, ChainId, NodeId, RawResponse, RpcRequest, VerifiedResult},
    utils::hex::parse_h256,
};

/// Attempts at committing a linked segment before giving up with `StaleAnchor`.
const COMMIT_ATTEMPTS: usize = 8;

/// Trust-anchor and header-segment limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustConfig {
    /// Anchors more than this many blocks below the tip are pruned.
    #[serde(default = "default_anchor_horizon")]
    pub anchor_horizon: u64,

    /// Longest header segment accepted in a single proof.
    #[serde(default = "default_max_segment_len")]
    pub max_segment_len: usize,

    /// Anchors sent to nodes as `verifiedHashes` link targets.
    #[serde(default = "default_verified_hash_hints")]
    pub verified_hash_hints: usize,
}

fn default_anchor_horizon() -> u64 {
    256
}

fn default_max_segment_len() -> usize {
    1024
}

fn default_verified_hash_hints() -> usize {
    8
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            anchor_horizon: default_anchor_horizon(),
            max_segment_len: default_max_segment_len(),
            verified_hash_hints: default_verified_hash_hints(),
        }
    }
}

impl TrustConfig {
    /// # Errors
    /// Returns a descriptive error string for zero limits.
    pub fn validate(&self) -> Result<(), String> {
        if self.anchor_horizon == 0 {
            return Err("trust.anchor_horizon must be greater than 0".to_string());
        }
        if self.max_segment_len == 0 {
            return Err("trust.max_segment_len must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Signer keys of a chain's registered nodes.
pub trait SignerDirectory: Send + Sync {
    /// Whether `signer` belongs to a registered, non-blacklisted node.
    fn is_registered_signer(&self, chain_id: ChainId, signer: &Address) -> bool;

    /// Signer key registered for `node`, if it has one.
    fn signer_of(&self, chain_id: ChainId, node: &NodeId) -> Option<Address>;
}

/// Checks an execution result (`eth_call`, `eth_estimateGas`) against proven state.
///
/// The client ships no EVM; applications that need execution results plug one in.
pub trait ExecutionVerifier: Send + Sync {
    /// # Errors
    /// `Mismatch` when re-execution against `state_root` yields a different result.
    fn verify_execution(
        &self,
        request: &RpcRequest,
        result: &Value,
        state_root: H256,
        proof: &payload::AccountProof,
    ) -> Result<(), VerificationError>;
}

/// A zero-knowledge proof system for checkpoint chains.
pub trait ProofSystem: Send + Sync {
    /// Returns `Ok(false)` for a well-formed proof that does not verify.
    ///
    /// # Errors
    /// A description of why the proof could not be evaluated at all.
    fn verify(&self, verifier_key: &[u8], public_inputs: &[Vec<u8>], proof: &[u8]) -> Result<bool, String>;
}

struct RegisteredProofSystem {
    verifier_key: Vec<u8>,
    system: Arc<dyn ProofSystem>,
}

/// Per-chain trust settings taken from [`ChainConfig`].
#[derive(Debug, Clone)]
pub(crate) struct ChainTrust {
    pub required_signatures: usize,
    pub pow_limit_bits: u32,
    pub committee: Option<CommitteeConfig>,
    pub zk_verifier: Option<String>,
}

impl Default for ChainTrust {
    fn default() -> Self {
        Self::from(&ChainConfig::new(0, "", ChainFamily::Account))
    }
}

impl From<&ChainConfig> for ChainTrust {
    fn from(chain: &ChainConfig) -> Self {
        Self {
            required_signatures: chain.required_signatures,
            pow_limit_bits: chain.pow_limit_bits,
            committee: chain.committee.clone(),
            zk_verifier: chain.zk_verifier.clone(),
        }
    }
}

/// How a family verifier's proving block is tied to trust.
pub(crate) enum Anchoring {
    /// Header segment containing the proving block, plus optional attestations.
    Segment { segment: Segment, signatures: Vec<RecoverableSignature> },
    /// Trusted on its own (committee checkpoint, zk proof, content attestations).
    Final,
}

/// A value proven against a block, not yet tied to trust.
pub(crate) struct Proven {
    pub value: Value,
    pub number: u64,
    pub hash: H256,
    pub anchoring: Anchoring,
}

/// Anchors at and above `from_block` were replaced by a heavier fork.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReorgNotice {
    pub chain_id: ChainId,
    pub from_block: u64,
}

/// Outcome of a successful verification.
#[derive(Debug, Clone)]
pub struct Verification {
    pub result: VerifiedResult,
    /// Set when committing the proof's headers replaced existing anchors.
    pub reorg: Option<ReorgNotice>,
}

/// Verifies node responses for every configured chain.
pub struct ProofVerifier {
    anchors: Arc<TrustAnchorStore>,
    signers: Arc<dyn SignerDirectory>,
    config: ArcSwap<TrustConfig>,
    chains: DashMap<ChainId, ChainTrust>,
    proof_systems: DashMap<String, RegisteredProofSystem>,
    execution: Option<Arc<dyn ExecutionVerifier>>,
}

impl fmt::Debug for ProofVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProofVerifier")
            .field("chains", &self.chains.len())
            .field("proof_systems", &self.proof_systems.len())
            .field("execution", &self.execution.is_some())
            .finish_non_exhaustive()
    }
}

impl ProofVerifier {
    #[must_use]
    pub fn new(config: TrustConfig, anchors: Arc<TrustAnchorStore>, signers: Arc<dyn SignerDirectory>) -> Self {
        Self {
            anchors,
            signers,
            config: ArcSwap::from_pointee(config),
            chains: DashMap::new(),
            proof_systems: DashMap::new(),
            execution: None,
        }
    }

    /// Enables `eth_call` / `eth_estimateGas` verification.
    #[must_use]
    pub fn with_execution_verifier(mut self, execution: Arc<dyn ExecutionVerifier>) -> Self {
        self.execution = Some(execution);
        self
    }

    /// Registers a chain's trust settings and seeds its checkpoint anchor.
    ///
    /// The checkpoint is ignored when the chain already has anchors, e.g.
    /// restored from a snapshot.
    pub fn configure_chain(&self, chain: &ChainConfig) {
        self.chains.insert(chain.id, ChainTrust::from(chain));
        if let Some(checkpoint) = chain.checkpoint {
            self.anchors.seed(TrustAnchor::checkpoint(chain.id, checkpoint.number, checkpoint.hash));
        }
    }

    /// Registers a proof system under `name` with the only verifier key it accepts.
    pub fn register_proof_system(&self, name: impl Into<String>, verifier_key: Vec<u8>, system: Arc<dyn ProofSystem>) {
        self.proof_systems.insert(name.into(), RegisteredProofSystem { verifier_key, system });
    }

    pub fn update_config(&self, config: TrustConfig) {
        self.config.store(Arc::new(config));
    }

    #[must_use]
    pub fn trust_config(&self) -> Arc<TrustConfig> {
        self.config.load_full()
    }

    #[must_use]
    pub fn anchors(&self) -> &Arc<TrustAnchorStore> {
        &self.anchors
    }

    #[must_use]
    pub fn execution_verifier(&self) -> Option<&dyn ExecutionVerifier> {
        self.execution.as_deref()
    }

    #[must_use]
    pub fn has_execution_verifier(&self) -> bool {
        self.execution.is_some()
    }

    /// Whether zk proofs are configured for a chain.
    #[must_use]
    pub fn uses_zk_proofs(&self, chain_id: ChainId) -> bool {
        self.chains.get(&chain_id).is_some_and(|c| c.zk_verifier.is_some())
    }

    /// Distinct attestations required for unanchored proving blocks of a chain.
    #[must_use]
    pub fn required_signatures(&self, chain_id: ChainId) -> usize {
        self.chains.get(&chain_id).map_or(0, |c| c.required_signatures)
    }

    fn chain_trust(&self, chain_id: ChainId) -> ChainTrust {
        self.chains.get(&chain_id).map(|c| c.value().clone()).unwrap_or_default()
    }

    pub(crate) fn signer_directory(&self) -> &dyn SignerDirectory {
        self.signers.as_ref()
    }

    /// Runs `system` named `name` over a proof, checking the verifier key first.
    pub(crate) fn run_proof_system(
        &self,
        name: &str,
        verifier_key: &[u8],
        public_inputs: &[Vec<u8>],
        proof: &[u8],
    ) -> Result<(), VerificationError> {
        let registered = self
            .proof_systems
            .get(name)
            .ok_or_else(|| VerificationError::malformed(format!("proof system {name} is not registered")))?;
        if registered.verifier_key != verifier_key {
            return Err(VerificationError::mismatch(format!("untrusted verifier key for {name}")));
        }
        match registered.system.verify(verifier_key, public_inputs, proof) {
            Ok(true) => Ok(()),
            Ok(false) => Err(VerificationError::mismatch(format!("{name} proof does not verify"))),
            Err(reason) => Err(VerificationError::malformed(reason)),
        }
    }

    /// Verifies a node response for `request`.
    ///
    /// On success the proving block is tied to trust, the anchors have been
    /// advanced if the proof carried newer headers, and the requested finality
    /// is met.
    ///
    /// # Errors
    /// Returns the [`VerificationError`] that rejected the response.
    pub fn verify(&self, response: &RawResponse, request: &RpcRequest) -> Result<Verification, VerificationError> {
        let chain_id = request.chain.id;
        let outcome = self.verify_inner(response, request);
        if let Err(err) = &outcome {
            metrics::record_verification_failure(chain_id, err.kind());
            debug!(
                chain = chain_id,
                node = %response.node,
                method = %request.method,
                error = %err,
                "response rejected"
            );
        }
        outcome
    }

    fn verify_inner(&self, response: &RawResponse, request: &RpcRequest) -> Result<Verification, VerificationError> {
        let raw = match &response.proof {
            None | Some(Value::Null) => return Err(VerificationError::MissingProof),
            Some(raw) => raw,
        };
        let payload: ProofPayload = serde_json::from_value(raw.clone())?;
        let trust = self.chain_trust(request.chain.id);

        let proven = match request.chain.family {
            ChainFamily::Account => eth::verify(self, request, response, payload)?,
            ChainFamily::Utxo => utxo::verify(self, &trust, request, response, payload)?,
            ChainFamily::ContentAddressed => content::verify(self, &trust, request, response, payload)?,
            ChainFamily::Checkpoint => checkpoint::verify(self, &trust, request, response, payload)?,
        };

        let (finality, reorg) = match &proven.anchoring {
            Anchoring::Final => (request.finality, None),
            Anchoring::Segment { segment, signatures } => {
                self.commit(request.chain.id, &trust, &proven, segment, signatures, &response.node)?
            }
        };
        if finality < request.finality {
            return Err(VerificationError::InsufficientFinality { have: finality, need: request.finality });
        }

        let result = VerifiedResult::new(
            proven.value,
            proven.hash,
            proven.number,
            request.chain.id,
            response.node.clone(),
        );
        Ok(Verification { result, reorg })
    }

    /// Links a segment to the anchors and commits any new anchors.
    ///
    /// Returns the proving block's confirmations and a reorg notice when the
    /// segment replaced anchors. Attestations signed by `responder` itself do
    /// not count.
    fn commit(
        &self,
        chain_id: ChainId,
        trust: &ChainTrust,
        proven: &Proven,
        segment: &Segment,
        signatures: &[RecoverableSignature],
        responder: &NodeId,
    ) -> Result<(u64, Option<ReorgNotice>), VerificationError> {
        let horizon = self.trust_config().anchor_horizon;

        for attempt in 0..COMMIT_ATTEMPTS {
            let current = self.anchors.load(chain_id);
            let plan = match anchors::plan_link(chain_id, &current, segment, proven.number, horizon) {
                Ok(plan) => plan,
                Err(VerificationError::Unanchored) if trust.required_signatures > 0 => {
                    attestation::require_attestations(
                        self.signer_directory(),
                        chain_id,
                        responder,
                        proven.hash,
                        proven.number,
                        signatures,
                        trust.required_signatures,
                    )?;
                    debug!(chain = chain_id, block = proven.number, "proving block accepted on attestations");
                    return Ok((segment.confirmations(proven.number), None));
                }
                Err(err) => return Err(err),
            };

            let Some(next) = plan.next else {
                return Ok((plan.finality, None));
            };
            let tip = next.tip().map_or(0, |a| a.number);
            if !self.anchors.compare_and_swap(chain_id, &current, next) {
                debug!(chain = chain_id, attempt, "anchor set changed while committing, relinking");
                continue;
            }

            metrics::record_anchor_advance(chain_id, tip);
            let reorg = plan.reorg_from.map(|from_block| {
                let depth = current.tip().map_or(0, |a| a.number.saturating_sub(from_block) + 1);
                warn!(chain = chain_id, from_block, depth, tip, "trust anchors reorganized");
                metrics::record_reorg(chain_id, depth);
                ReorgNotice { chain_id, from_block }
            });
            if reorg.is_none() {
                info!(chain = chain_id, tip, "trust anchors advanced");
            }
            return Ok((plan.finality, reorg));
        }
        Err(VerificationError::StaleAnchor)
    }
}

/// Rejects proving blocks that do not match the block the request names.
pub(crate) fn check_block_ref(request: &RpcRequest, number: u64, hash: H256) -> Result<(), VerificationError> {
    match crate::request::block_ref(request)? {
        Some(block) if !block.admits(number, hash) => Err(VerificationError::mismatch(format!(
            "proving block {number} does not match requested {block:?}"
        ))),
        _ => Ok(()),
    }
}

pub(crate) fn ensure_eq<T: PartialEq + fmt::Debug>(what: &str, claimed: T, proven: T) -> Result<(), VerificationError> {
    if claimed == proven {
        Ok(())
    } else {
        Err(VerificationError::mismatch(format!("{what}: claimed {claimed:?}, proven {proven:?}")))
    }
}

/// A present, non-null field of a result object.
pub(crate) fn result_field<'v>(value: &'v Value, name: &str) -> Result<&'v Value, VerificationError> {
    match value.get(name) {
        None | Some(Value::Null) => Err(VerificationError::malformed(format!("result has no {name}"))),
        Some(field) => Ok(field),
    }
}

pub(crate) fn hash_field(value: &Value, name: &str) -> Result<H256, VerificationError> {
    let field = result_field(value, name)?;
    let s = field
        .as_str()
        .ok_or_else(|| VerificationError::malformed(format!("{name} is not a string")))?;
    Ok(parse_h256(s)?)
}
