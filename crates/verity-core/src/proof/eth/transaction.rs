//! Transaction and receipt proofs against the transaction and receipt tries.

use primitive_types::{H256, U256};
use rlp::Rlp;
use serde_json::Value;

use super::{u256_from_be, EthHeader};
use crate::{
    crypto::keccak256,
    proof::{
        ensure_eq, hash_field, mpt,
        payload::{HexBytes, ReceiptProof, TransactionProof},
        result_field, VerificationError,
    },
    types::{RawResponse, RpcRequest},
    utils::hex::{parse_h256, value_to_bytes, value_to_u256, value_to_u64},
};

fn index_key(index: u64) -> Vec<u8> {
    rlp::encode(&index).to_vec()
}

/// Proves the raw transaction at `index` and returns it with its hash.
fn prove_transaction(header: &EthHeader, index: u64, proof: &[HexBytes]) -> Result<(Vec<u8>, H256), VerificationError> {
    let raw = mpt::verify_proof(header.tx_root, &index_key(index), proof)?
        .ok_or_else(|| VerificationError::mismatch(format!("no transaction at index {index} in block {}", header.number)))?;
    let hash = keccak256(&raw);
    Ok((raw, hash))
}

/// The requested hash and the inclusion position claimed in `result`.
fn check_position(
    request: &RpcRequest,
    result: &Value,
    header: &EthHeader,
    index: u64,
    hash: H256,
    hash_name: &str,
) -> Result<(), VerificationError> {
    let requested = request
        .param_str(0)
        .ok_or_else(|| VerificationError::malformed("request has no transaction hash"))?;
    ensure_eq("transaction hash", parse_h256(requested)?, hash)?;
    ensure_eq(hash_name, hash_field(result, hash_name)?, hash)?;
    ensure_eq("block hash", hash_field(result, "blockHash")?, header.hash)?;
    ensure_eq("block number", value_to_u64(result_field(result, "blockNumber")?)?, header.number)?;
    ensure_eq("transaction index", value_to_u64(result_field(result, "transactionIndex")?)?, index)
}

pub(super) fn verify_transaction(
    request: &RpcRequest,
    response: &RawResponse,
    header: &EthHeader,
    proof: &TransactionProof,
) -> Result<(), VerificationError> {
    let result = &response.result;
    let index = proof.tx_index.0;
    let (raw, hash) = prove_transaction(header, index, &proof.merkle_proof)?;
    check_position(request, result, header, index, hash, "hash")?;
    ensure_eq("raw transaction", value_to_bytes(result_field(result, "raw")?)?, raw)
}

struct ProvenReceipt {
    /// Post-byzantium status, or `None` for receipts carrying a state root.
    status: Option<u64>,
    cumulative_gas_used: U256,
    logs: Vec<ProvenLog>,
}

struct ProvenLog {
    address: Vec<u8>,
    topics: Vec<Vec<u8>>,
    data: Vec<u8>,
}

impl ProvenReceipt {
    /// Decodes a legacy or typed (EIP-2718) receipt.
    fn decode(bytes: &[u8]) -> Result<Self, VerificationError> {
        let body = match bytes.first() {
            Some(&kind) if kind < 0x80 => &bytes[1..],
            Some(_) => bytes,
            None => return Err(VerificationError::malformed("empty receipt")),
        };
        let rlp = Rlp::new(body);
        if rlp.item_count()? != 4 {
            return Err(VerificationError::malformed("receipt must have four fields"));
        }
        let outcome = rlp.at(0)?.data()?;
        let status = match outcome.len() {
            32 => None,
            0 => Some(0),
            1 => Some(u64::from(outcome[0])),
            n => return Err(VerificationError::malformed(format!("receipt status of {n} bytes"))),
        };
        let logs = rlp
            .at(3)?
            .iter()
            .map(|log| -> Result<ProvenLog, rlp::DecoderError> {
                Ok(ProvenLog {
                    address: log.at(0)?.data()?.to_vec(),
                    topics: log
                        .at(1)?
                        .iter()
                        .map(|t| t.data().map(<[u8]>::to_vec))
                        .collect::<Result<Vec<_>, rlp::DecoderError>>()?,
                    data: log.at(2)?.data()?.to_vec(),
                })
            })
            .collect::<Result<Vec<_>, rlp::DecoderError>>()?;
        Ok(Self { status, cumulative_gas_used: u256_from_be(rlp.at(1)?.data()?)?, logs })
    }
}

pub(super) fn verify_receipt(
    request: &RpcRequest,
    response: &RawResponse,
    header: &EthHeader,
    proof: &ReceiptProof,
) -> Result<(), VerificationError> {
    let result = &response.result;
    let index = proof.tx_index.0;

    let (_, hash) = prove_transaction(header, index, &proof.tx_proof)?;
    check_position(request, result, header, index, hash, "transactionHash")?;

    let bytes = mpt::verify_proof(header.receipts_root, &index_key(index), &proof.merkle_proof)?
        .ok_or_else(|| VerificationError::mismatch(format!("no receipt at index {index} in block {}", header.number)))?;
    let receipt = ProvenReceipt::decode(&bytes)?;

    if let (Some(status), Some(claimed)) = (receipt.status, result.get("status")) {
        ensure_eq("status", value_to_u64(claimed)?, status)?;
    }
    ensure_eq(
        "cumulative gas used",
        value_to_u256(result_field(result, "cumulativeGasUsed")?)?,
        receipt.cumulative_gas_used,
    )?;

    let logs = result_field(result, "logs")?
        .as_array()
        .ok_or_else(|| VerificationError::malformed("logs is not an array"))?;
    ensure_eq("log count", logs.len(), receipt.logs.len())?;
    for (claimed, proven) in logs.iter().zip(&receipt.logs) {
        ensure_eq("log address", value_to_bytes(result_field(claimed, "address")?)?, proven.address.clone())?;
        ensure_eq("log data", value_to_bytes(result_field(claimed, "data")?)?, proven.data.clone())?;
        let topics = result_field(claimed, "topics")?
            .as_array()
            .ok_or_else(|| VerificationError::malformed("topics is not an array"))?
            .iter()
            .map(value_to_bytes)
            .collect::<Result<Vec<_>, _>>()?;
        ensure_eq("log topics", topics, proven.topics.clone())?;
    }
    Ok(())
}
