//! Block and block-number proofs: the answer must match the proving header.

use super::EthHeader;
use crate::{
    proof::{check_block_ref, ensure_eq, hash_field, result_field, VerificationError},
    types::{RawResponse, RpcRequest},
    utils::hex::{parse_h256, value_to_u64},
};

/// Checks a block (or the block number) against the proving header.
pub(super) fn verify(request: &RpcRequest, response: &RawResponse, header: &EthHeader) -> Result<(), VerificationError> {
    let result = &response.result;

    match request.method.as_str() {
        "eth_blockNumber" => ensure_eq("block number", value_to_u64(result)?, header.number),
        "eth_getBlockByNumber" | "eth_getBlockByHash" => {
            if result.is_null() {
                return Err(VerificationError::malformed("absent blocks cannot be proven"));
            }
            check_block_ref(request, header.number, header.hash)?;
            if request.method == "eth_getBlockByHash" {
                let requested = request
                    .param_str(0)
                    .ok_or_else(|| VerificationError::malformed("request has no block hash"))?;
                ensure_eq("requested hash", parse_h256(requested)?, header.hash)?;
            }
            ensure_eq("number", value_to_u64(result_field(result, "number")?)?, header.number)?;
            ensure_eq("hash", hash_field(result, "hash")?, header.hash)?;
            ensure_eq("parent hash", hash_field(result, "parentHash")?, header.parent)?;
            ensure_eq("state root", hash_field(result, "stateRoot")?, header.state_root)?;
            ensure_eq("transactions root", hash_field(result, "transactionsRoot")?, header.tx_root)?;
            ensure_eq("receipts root", hash_field(result, "receiptsRoot")?, header.receipts_root)
        }
        other => Err(VerificationError::malformed(format!("{other} cannot be answered with a block proof"))),
    }
}
