//! Block-hash attestations by registered node signers.

use primitive_types::{H256, U256};
use std::collections::HashSet;

use super::{SignerDirectory, VerificationError};
use crate::{
    crypto::{keccak256, RecoverableSignature},
    types::{Address, ChainId, NodeId},
};

/// Message a signer attests to: `keccak256(block_hash ‖ uint256(number))`.
#[must_use]
pub fn attestation_digest(block_hash: H256, number: u64) -> H256 {
    let mut message = [0u8; 64];
    message[..32].copy_from_slice(block_hash.as_bytes());
    U256::from(number).to_big_endian(&mut message[32..]);
    keccak256(&message)
}

/// Distinct registered signers among `signatures` over `digest`.
///
/// Signatures that fail recovery, come from unknown signers or were made with
/// the key of `responder` itself are ignored.
pub(crate) fn registered_signers(
    directory: &dyn SignerDirectory,
    chain_id: ChainId,
    responder: &NodeId,
    digest: &H256,
    signatures: &[RecoverableSignature],
) -> HashSet<Address> {
    let own = directory.signer_of(chain_id, responder);
    signatures
        .iter()
        .filter_map(|signature| signature.recover(digest).ok())
        .filter(|signer| Some(*signer) != own && directory.is_registered_signer(chain_id, signer))
        .collect()
}

/// Requires `required` distinct registered signers for a proving block.
///
/// # Errors
/// `Unanchored` when too few registered signers attested the block.
pub(crate) fn require_attestations(
    directory: &dyn SignerDirectory,
    chain_id: ChainId,
    responder: &NodeId,
    block_hash: H256,
    number: u64,
    signatures: &[RecoverableSignature],
    required: usize,
) -> Result<(), VerificationError> {
    let digest = attestation_digest(block_hash, number);
    let signers = registered_signers(directory, chain_id, responder, &digest, signatures);
    if signers.len() < required {
        tracing::debug!(
            chain = chain_id,
            block = number,
            have = signers.len(),
            need = required,
            "not enough block attestations"
        );
        return Err(VerificationError::Unanchored);
    }
    Ok(())
}
