//! UTXO-chain proofs: proof-of-work headers and Merkle-block inclusion.
//!
//! Hashes are handled in display (big-endian) byte order everywhere outside
//! this module: anchors, checkpoints and request parameters all use it.
//! Internally, header fields and Merkle nodes are little-endian as on the wire.

use primitive_types::{H256, U256};
use serde_json::Value;

use super::{
    anchors::{LinkedHeader, Segment},
    ensure_eq, hash_field,
    payload::{HexBytes, MerkleBlockProof, ProofPayload},
    result_field, Anchoring, ChainTrust, ProofVerifier, Proven, VerificationError,
};
use crate::{
    crypto::sha256d,
    types::{ProofType, RawResponse, RpcRequest},
    utils::hex::{parse_bytes, parse_h256, value_to_u64},
};

const HEADER_LEN: usize = 80;

/// A decoded 80-byte block header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtxoHeader {
    pub raw: Vec<u8>,
    pub height: u64,
    /// Display order.
    pub hash: H256,
    /// Display order.
    pub parent: H256,
    /// Wire (little-endian) order.
    pub merkle_root: [u8; 32],
    pub bits: u32,
}

fn reversed(bytes: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    for (dst, src) in out.iter_mut().zip(bytes.iter().rev()) {
        *dst = *src;
    }
    out
}

impl UtxoHeader {
    /// Decodes a header at `height`.
    ///
    /// # Errors
    /// `Malformed` unless `raw` is exactly 80 bytes.
    pub fn decode(raw: &[u8], height: u64) -> Result<Self, VerificationError> {
        if raw.len() != HEADER_LEN {
            return Err(VerificationError::malformed(format!("header of {} bytes", raw.len())));
        }
        let mut merkle_root = [0u8; 32];
        merkle_root.copy_from_slice(&raw[36..68]);
        let mut bits = [0u8; 4];
        bits.copy_from_slice(&raw[72..76]);
        Ok(Self {
            raw: raw.to_vec(),
            height,
            hash: H256(reversed(&sha256d(raw))),
            parent: H256(reversed(&raw[4..36])),
            merkle_root,
            bits: u32::from_le_bytes(bits),
        })
    }

    /// Checks the target against `pow_limit` and the hash against the target.
    ///
    /// Returns the header's work.
    ///
    /// # Errors
    /// `Malformed` for invalid compact targets, `Mismatch` for insufficient work.
    pub fn check_work(&self, pow_limit: U256) -> Result<U256, VerificationError> {
        let target = compact_target(self.bits)?;
        if target > pow_limit {
            return Err(VerificationError::mismatch(format!(
                "header {} target above the chain's proof-of-work limit",
                self.height
            )));
        }
        if U256::from_big_endian(self.hash.as_bytes()) > target {
            return Err(VerificationError::mismatch(format!("header {} hash exceeds its target", self.height)));
        }
        Ok(work(target))
    }
}

/// Expands a compact (`nBits`) difficulty target.
///
/// # Errors
/// `Malformed` for negative, zero or overflowing targets.
pub fn compact_target(bits: u32) -> Result<U256, VerificationError> {
    let exponent = bits >> 24;
    let mantissa = bits & 0x007f_ffff;
    if bits & 0x0080_0000 != 0 {
        return Err(VerificationError::malformed(format!("negative compact target {bits:#010x}")));
    }
    if mantissa == 0 {
        return Err(VerificationError::malformed(format!("zero compact target {bits:#010x}")));
    }
    if exponent <= 3 {
        let target = mantissa >> (8 * (3 - exponent));
        if target == 0 {
            return Err(VerificationError::malformed(format!("zero compact target {bits:#010x}")));
        }
        return Ok(U256::from(target));
    }
    let overflows = exponent > 34 || (mantissa > 0xff && exponent > 33) || (mantissa > 0xffff && exponent > 32);
    if overflows {
        return Err(VerificationError::malformed(format!("compact target {bits:#010x} overflows")));
    }
    Ok(U256::from(mantissa) << (8 * (exponent - 3) as usize))
}

/// Expected hashes to find a block at `target`: `2^256 / (target + 1)`.
#[must_use]
pub fn work(target: U256) -> U256 {
    (!target / target.saturating_add(U256::one())).saturating_add(U256::one())
}

/// Transaction id in display order, ignoring segwit witness data.
///
/// # Errors
/// `Malformed` for truncated transactions.
pub fn txid(raw: &[u8]) -> Result<H256, VerificationError> {
    let is_segwit = raw.len() > 10 && raw[4] == 0 && raw[5] == 1;
    if !is_segwit {
        return Ok(H256(reversed(&sha256d(raw))));
    }

    let mut cursor = Cursor { data: raw, pos: 6 };
    let inputs = cursor.varint()?;
    for _ in 0..inputs {
        cursor.skip(36)?;
        let script = cursor.varint()?;
        cursor.skip(script)?;
        cursor.skip(4)?;
    }
    let outputs = cursor.varint()?;
    for _ in 0..outputs {
        cursor.skip(8)?;
        let script = cursor.varint()?;
        cursor.skip(script)?;
    }
    let body_end = cursor.pos;
    for _ in 0..inputs {
        let items = cursor.varint()?;
        for _ in 0..items {
            let len = cursor.varint()?;
            cursor.skip(len)?;
        }
    }
    if raw.len() - cursor.pos != 4 {
        return Err(VerificationError::malformed("transaction has trailing bytes after witness data"));
    }

    let mut stripped = Vec::with_capacity(raw.len());
    stripped.extend_from_slice(&raw[..4]);
    stripped.extend_from_slice(&raw[6..body_end]);
    stripped.extend_from_slice(&raw[raw.len() - 4..]);
    Ok(H256(reversed(&sha256d(&stripped))))
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn take(&mut self, len: usize) -> Result<&[u8], VerificationError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| VerificationError::malformed("truncated transaction"))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn skip(&mut self, len: usize) -> Result<(), VerificationError> {
        self.take(len).map(|_| ())
    }

    fn varint(&mut self) -> Result<usize, VerificationError> {
        let first = self.take(1)?[0];
        let width = match first {
            0xfd => 2,
            0xfe => 4,
            0xff => 8,
            n => return Ok(usize::from(n)),
        };
        let bytes = self.take(width)?;
        let value = bytes.iter().rev().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
        usize::try_from(value).map_err(|_| VerificationError::malformed("varint out of range"))
    }
}

/// Folds a Merkle branch (display order siblings) from `leaf` at `index`.
fn merkle_root(leaf: H256, index: u64, branch: &[String]) -> Result<[u8; 32], VerificationError> {
    let mut node = reversed(leaf.as_bytes());
    let mut index = index;
    for sibling in branch {
        let sibling = reversed(parse_h256(sibling)?.as_bytes());
        let mut pair = [0u8; 64];
        if index & 1 == 0 {
            pair[..32].copy_from_slice(&node);
            pair[32..].copy_from_slice(&sibling);
        } else {
            pair[..32].copy_from_slice(&sibling);
            pair[32..].copy_from_slice(&node);
        }
        node = sha256d(&pair);
        index >>= 1;
    }
    if index != 0 {
        return Err(VerificationError::malformed("transaction index exceeds the Merkle branch"));
    }
    Ok(node)
}

fn decode_segment(
    headers: &[HexBytes],
    first_height: u64,
    pow_limit: U256,
    max_len: usize,
) -> Result<(Vec<UtxoHeader>, Segment), VerificationError> {
    let mut decoded = Vec::with_capacity(headers.len());
    let mut linked = Vec::with_capacity(headers.len());
    for (offset, raw) in headers.iter().enumerate() {
        let height = first_height
            .checked_add(offset as u64)
            .ok_or_else(|| VerificationError::malformed("header height overflows"))?;
        let header = UtxoHeader::decode(&raw.0, height)?;
        let weight = header.check_work(pow_limit)?;
        linked.push(LinkedHeader { number: height, hash: header.hash, parent: header.parent, weight });
        decoded.push(header);
    }
    let segment = Segment::new(linked, max_len)?;
    Ok((decoded, segment))
}

/// Raw transaction bytes from a `getrawtransaction` result.
fn raw_transaction(result: &Value) -> Result<Vec<u8>, VerificationError> {
    let hex = match result {
        Value::String(s) => s.as_str(),
        Value::Object(_) => result_field(result, "hex")?
            .as_str()
            .ok_or_else(|| VerificationError::malformed("hex is not a string"))?,
        _ => return Err(VerificationError::malformed("unexpected transaction result")),
    };
    Ok(parse_bytes(hex)?)
}

fn requested_hash(request: &RpcRequest, what: &str) -> Result<H256, VerificationError> {
    let raw = request
        .param_str(0)
        .ok_or_else(|| VerificationError::malformed(format!("request has no {what}")))?;
    Ok(parse_h256(raw)?)
}

fn verify_transaction(
    request: &RpcRequest,
    result: &Value,
    header: &UtxoHeader,
    proof: &MerkleBlockProof,
) -> Result<(), VerificationError> {
    let id = txid(&raw_transaction(result)?)?;
    ensure_eq("txid", requested_hash(request, "txid")?, id)?;
    if let Some(block) = result.get("blockhash").and_then(Value::as_str) {
        ensure_eq("block hash", parse_h256(block)?, header.hash)?;
    }
    let index = proof
        .tx_index
        .ok_or_else(|| VerificationError::malformed("merkle block proof has no txIndex"))?;
    let root = merkle_root(id, index.0, &proof.merkle_branch)?;
    if root != header.merkle_root {
        return Err(VerificationError::mismatch(format!(
            "transaction {id:?} is not in block {}",
            header.height
        )));
    }
    Ok(())
}

fn verify_header(request: &RpcRequest, result: &Value, header: &UtxoHeader) -> Result<(), VerificationError> {
    ensure_eq("block hash", requested_hash(request, "block hash")?, header.hash)?;
    match result {
        Value::String(raw) => ensure_eq("raw header", parse_bytes(raw)?, header.raw.clone()),
        Value::Object(_) => {
            ensure_eq("hash", hash_field(result, "hash")?, header.hash)?;
            ensure_eq("height", value_to_u64(result_field(result, "height")?)?, header.height)?;
            ensure_eq("merkle root", hash_field(result, "merkleroot")?, H256(reversed(&header.merkle_root)))?;
            if let Some(parent) = result.get("previousblockhash").and_then(Value::as_str) {
                ensure_eq("previous block hash", parse_h256(parent)?, header.parent)?;
            }
            Ok(())
        }
        _ => Err(VerificationError::malformed("unexpected block header result")),
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
        ProofPayload::MerkleBlockProof(proof) => proof,
        other => {
            return Err(VerificationError::malformed(format!(
                "{} cannot prove a {} request",
                other.kind(),
                request.proof_type.as_str()
            )))
        }
    };
    let pow_limit = compact_target(trust.pow_limit_bits)?;
    let max_len = verifier.trust_config().max_segment_len;
    let (headers, segment) = decode_segment(&proof.headers, proof.height.0, pow_limit, max_len)?;
    let header = headers
        .iter()
        .find(|h| h.height == proof.block.0)
        .ok_or_else(|| VerificationError::malformed(format!("proving block {} is not in the segment", proof.block.0)))?;

    let result = &response.result;
    match (request.proof_type, request.method.as_str()) {
        (ProofType::MerkleBlock, _) => verify_transaction(request, result, header, &proof)?,
        (ProofType::UtxoHeader, "getblockcount") => {
            ensure_eq("block count", value_to_u64(result)?, header.height)?;
        }
        (ProofType::UtxoHeader, _) => verify_header(request, result, header)?,
        (other, _) => {
            return Err(VerificationError::malformed(format!(
                "merkleBlockProof cannot prove a {} request",
                other.as_str()
            )))
        }
    }

    Ok(Proven {
        value: result.clone(),
        number: header.height,
        hash: header.hash,
        anchoring: Anchoring::Segment { segment, signatures: proof.signatures.clone() },
    })
}

/// Renders a display-order hash the way UTXO nodes do: plain hex, no prefix.
#[must_use]
pub fn display_hex(hash: &H256) -> String {
    hex::encode(hash.as_bytes())
}
