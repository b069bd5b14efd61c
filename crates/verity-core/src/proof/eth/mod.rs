//! Account-chain proofs: RLP headers, state, transactions, receipts and blocks.
//!
//! Every payload carries an ascending header segment containing the proving
//! block. Values are proven against roots found in the proving header; the
//! segment itself is linked to trust by the caller.

mod block;
mod state;
mod transaction;

pub use state::KECCAK_EMPTY;

use primitive_types::{H256, U256};
use rlp::Rlp;

use super::{
    anchors::{LinkedHeader, Segment},
    payload::{HexBytes, ProofPayload},
    Anchoring, ProofVerifier, Proven, VerificationError,
};
use crate::{
    crypto::{keccak256, RecoverableSignature},
    types::{ProofType, RawResponse, RpcRequest},
};

/// Header fields the verifier needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthHeader {
    pub number: u64,
    pub hash: H256,
    pub parent: H256,
    pub state_root: H256,
    pub tx_root: H256,
    pub receipts_root: H256,
}

impl EthHeader {
    /// Decodes an RLP header; the hash is `keccak256` of the encoding.
    ///
    /// # Errors
    /// `Malformed` unless `raw` is a single RLP list with the expected fields.
    pub fn decode(raw: &[u8]) -> Result<Self, VerificationError> {
        let rlp = Rlp::new(raw);
        if !rlp.is_list() || rlp.payload_info()?.total() != raw.len() {
            return Err(VerificationError::malformed("header is not a single rlp list"));
        }
        if rlp.item_count()? < 9 {
            return Err(VerificationError::malformed("header has too few fields"));
        }
        Ok(Self {
            number: u64_from_be(rlp.at(8)?.data()?)?,
            hash: keccak256(raw),
            parent: h256_item(&rlp, 0)?,
            state_root: h256_item(&rlp, 3)?,
            tx_root: h256_item(&rlp, 4)?,
            receipts_root: h256_item(&rlp, 5)?,
        })
    }

    fn linked(&self) -> LinkedHeader {
        LinkedHeader { number: self.number, hash: self.hash, parent: self.parent, weight: U256::one() }
    }
}

pub(crate) fn h256_item(rlp: &Rlp<'_>, index: usize) -> Result<H256, VerificationError> {
    let data = rlp.at(index)?.data()?;
    if data.len() != 32 {
        return Err(VerificationError::malformed(format!("field {index} is not a 32-byte hash")));
    }
    Ok(H256::from_slice(data))
}

pub(crate) fn u64_from_be(bytes: &[u8]) -> Result<u64, VerificationError> {
    if bytes.len() > 8 {
        return Err(VerificationError::malformed("integer wider than 64 bits"));
    }
    Ok(bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

pub(crate) fn u256_from_be(bytes: &[u8]) -> Result<U256, VerificationError> {
    if bytes.len() > 32 {
        return Err(VerificationError::malformed("integer wider than 256 bits"));
    }
    Ok(U256::from_big_endian(bytes))
}

/// Header segment of a payload plus the decoded proving header.
struct ProvenHeaders {
    segment: Segment,
    proving: EthHeader,
}

fn decode_headers(raw: &[HexBytes], block: u64, max_len: usize) -> Result<ProvenHeaders, VerificationError> {
    let headers = raw.iter().map(|h| EthHeader::decode(&h.0)).collect::<Result<Vec<_>, _>>()?;
    let segment = Segment::new(headers.iter().map(EthHeader::linked).collect(), max_len)?;
    let proving = headers
        .into_iter()
        .find(|h| h.number == block)
        .ok_or_else(|| VerificationError::malformed(format!("proving block {block} is not in the header segment")))?;
    Ok(ProvenHeaders { segment, proving })
}

fn proven(
    response: &RawResponse,
    headers: ProvenHeaders,
    signatures: &[RecoverableSignature],
) -> Proven {
    Proven {
        value: response.result.clone(),
        number: headers.proving.number,
        hash: headers.proving.hash,
        anchoring: Anchoring::Segment { segment: headers.segment, signatures: signatures.to_vec() },
    }
}

pub(super) fn verify(
    verifier: &ProofVerifier,
    request: &RpcRequest,
    response: &RawResponse,
    payload: ProofPayload,
) -> Result<Proven, VerificationError> {
    let max_len = verifier.trust_config().max_segment_len;
    match (request.proof_type, payload) {
        (
            ProofType::Account | ProofType::Code | ProofType::Storage | ProofType::NodeList,
            ProofPayload::AccountProof(proof),
        ) => {
            let headers = decode_headers(&proof.headers, proof.block.0, max_len)?;
            state::verify(request, response, &headers.proving, &proof)?;
            Ok(proven(response, headers, &proof.signatures))
        }
        (ProofType::Execution, ProofPayload::AccountProof(proof)) => {
            let execution = verifier
                .execution_verifier()
                .ok_or_else(|| VerificationError::malformed("no execution verifier registered"))?;
            let headers = decode_headers(&proof.headers, proof.block.0, max_len)?;
            super::check_block_ref(request, headers.proving.number, headers.proving.hash)?;
            execution.verify_execution(request, &response.result, headers.proving.state_root, &proof)?;
            Ok(proven(response, headers, &proof.signatures))
        }
        (ProofType::Receipt, ProofPayload::ReceiptProof(proof)) => {
            let headers = decode_headers(&proof.headers, proof.block.0, max_len)?;
            transaction::verify_receipt(request, response, &headers.proving, &proof)?;
            Ok(proven(response, headers, &proof.signatures))
        }
        (ProofType::Transaction, ProofPayload::TransactionProof(proof)) => {
            let headers = decode_headers(&proof.headers, proof.block.0, max_len)?;
            transaction::verify_transaction(request, response, &headers.proving, &proof)?;
            Ok(proven(response, headers, &proof.signatures))
        }
        (ProofType::Block, ProofPayload::BlockProof(proof)) => {
            let headers = decode_headers(&proof.headers, proof.block.0, max_len)?;
            block::verify(request, response, &headers.proving)?;
            Ok(proven(response, headers, &proof.signatures))
        }
        (expected, payload) => Err(VerificationError::malformed(format!(
            "{} cannot prove a {} request",
            payload.kind(),
            expected.as_str()
        ))),
    }
}

#[cfg(test)]
pub(crate) mod test_headers {
    use super::*;
    use rlp::RlpStream;

    /// Encodes a minimal 15-field header.
    pub(crate) fn encode_header(
        number: u64,
        parent: H256,
        state_root: H256,
        tx_root: H256,
        receipts_root: H256,
    ) -> Vec<u8> {
        let mut s = RlpStream::new_list(15);
        s.append(&parent.as_bytes().to_vec());
        s.append(&keccak256(&[0xc0]).as_bytes().to_vec());
        s.append(&vec![0u8; 20]);
        s.append(&state_root.as_bytes().to_vec());
        s.append(&tx_root.as_bytes().to_vec());
        s.append(&receipts_root.as_bytes().to_vec());
        s.append(&vec![0u8; 256]);
        s.append(&0u64);
        s.append(&number);
        s.append(&30_000_000u64);
        s.append(&0u64);
        s.append(&(1_700_000_000u64 + number * 12));
        s.append(&Vec::<u8>::new());
        s.append(&vec![0u8; 32]);
        s.append(&vec![0u8; 8]);
        s.out().to_vec()
    }
}
