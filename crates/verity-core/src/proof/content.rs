//! Content-addressed lookups: the content must hash to its address, and
//! registered nodes must attest the address.

use primitive_types::H256;
use serde_json::Value;

use super::{
    attestation::registered_signers, ensure_eq, payload::ProofPayload, Anchoring, ChainTrust, ProofVerifier,
    Proven, VerificationError,
};
use crate::{
    crypto::{keccak256, sha256},
    types::{RawResponse, RpcRequest},
    utils::hex::parse_bytes,
};

/// Multihash code of sha2-256.
const SHA2_256: u8 = 0x12;

/// Decodes a content identifier into its sha2-256 multihash.
///
/// Accepts base58 `Qm…` identifiers and `0x`-hex multihashes.
///
/// # Errors
/// `Malformed` for undecodable identifiers or hash functions other than sha2-256.
pub fn decode_cid(cid: &str) -> Result<Vec<u8>, VerificationError> {
    let multihash = if cid.starts_with("0x") {
        parse_bytes(cid)?
    } else {
        bs58::decode(cid)
            .into_vec()
            .map_err(|e| VerificationError::malformed(format!("invalid content id {cid}: {e}")))?
    };
    match multihash.as_slice() {
        [SHA2_256, 32, digest @ ..] if digest.len() == 32 => Ok(multihash),
        _ => Err(VerificationError::malformed(format!("unsupported content id {cid}"))),
    }
}

/// sha2-256 multihash of `content`.
#[must_use]
pub fn multihash(content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(34);
    out.extend_from_slice(&[SHA2_256, 32]);
    out.extend_from_slice(&sha256(content));
    out
}

/// Base58 identifier of `content`.
#[must_use]
pub fn content_id(content: &[u8]) -> String {
    bs58::encode(multihash(content)).into_string()
}

/// Returned bytes: hex by default, UTF-8 text when the request asks for `utf8`.
fn content_bytes(request: &RpcRequest, result: &Value) -> Result<Vec<u8>, VerificationError> {
    let text = result
        .as_str()
        .ok_or_else(|| VerificationError::malformed("content result is not a string"))?;
    match request.param_str(1) {
        Some("utf8") => Ok(text.as_bytes().to_vec()),
        Some("hex") | None => Ok(parse_bytes(text)?),
        Some(other) => Err(VerificationError::malformed(format!("unknown content encoding {other}"))),
    }
}

pub(super) fn verify(
    verifier: &ProofVerifier,
    trust: &ChainTrust,
    request: &RpcRequest,
    response: &RawResponse,
    payload: ProofPayload,
) -> Result<Proven, VerificationError> {
    let proof = match payload {
        ProofPayload::ContentProof(proof) => proof,
        other => {
            return Err(VerificationError::malformed(format!(
                "{} cannot prove a content lookup",
                other.kind()
            )))
        }
    };

    let cid = request
        .param_str(0)
        .ok_or_else(|| VerificationError::malformed("request has no content id"))?;
    let expected = decode_cid(cid)?;
    let content = content_bytes(request, &response.result)?;
    ensure_eq("content multihash", multihash(&content), expected.clone())?;

    let required = trust.required_signatures.max(1);
    let digest = keccak256(&expected);
    let signers = registered_signers(verifier.signer_directory(), request.chain.id, &response.node, &digest, &proof.signatures);
    if signers.len() < required {
        return Err(VerificationError::Unanchored);
    }

    Ok(Proven {
        value: response.result.clone(),
        number: 0,
        hash: H256(sha256(&content)),
        anchoring: Anchoring::Final,
    })
}
