//! Account, code, storage and registry node-list proofs against a state root.

use primitive_types::{H256, U256};
use rlp::Rlp;

use super::{h256_item, u256_from_be, EthHeader};
use crate::{
    crypto::keccak256,
    proof::{
        check_block_ref, ensure_eq,
        mpt,
        payload::{AccountEntry, AccountProof},
        VerificationError,
    },
    registry::NodeList,
    types::{Address, ProofType, RawResponse, RpcRequest},
    utils::hex::{parse_bytes, parse_u256, value_to_bytes, value_to_u256},
};

/// `keccak256` of empty input: the code hash of accounts without code.
pub const KECCAK_EMPTY: H256 = H256([
    0xc5, 0xd2, 0x46, 0x01, 0x86, 0xf7, 0x23, 0x3c, 0x92, 0x7e, 0x7d, 0xb2, 0xdc, 0xc7, 0x03, 0xc0,
    0xe5, 0x00, 0xb6, 0x53, 0xca, 0x82, 0x27, 0x3b, 0x7b, 0xfa, 0xd8, 0x04, 0x5d, 0x85, 0xa4, 0x70,
]);

#[derive(Debug, Clone, PartialEq, Eq)]
struct AccountState {
    nonce: U256,
    balance: U256,
    storage_root: H256,
    code_hash: H256,
}

impl AccountState {
    fn empty() -> Self {
        Self {
            nonce: U256::zero(),
            balance: U256::zero(),
            storage_root: mpt::EMPTY_TRIE_ROOT,
            code_hash: KECCAK_EMPTY,
        }
    }

    fn decode(bytes: &[u8]) -> Result<Self, VerificationError> {
        let rlp = Rlp::new(bytes);
        if rlp.item_count()? != 4 {
            return Err(VerificationError::malformed("account must have four fields"));
        }
        Ok(Self {
            nonce: u256_from_be(rlp.at(0)?.data()?)?,
            balance: u256_from_be(rlp.at(1)?.data()?)?,
            storage_root: h256_item(&rlp, 2)?,
            code_hash: h256_item(&rlp, 3)?,
        })
    }
}

fn address_param(request: &RpcRequest) -> Result<Address, VerificationError> {
    let raw = request
        .param_str(0)
        .ok_or_else(|| VerificationError::malformed("request has no address parameter"))?;
    let bytes = parse_bytes(raw)?;
    if bytes.len() != 20 {
        return Err(VerificationError::malformed(format!("invalid address {raw}")));
    }
    Ok(Address::from_slice(&bytes))
}

/// Parses a storage slot given as a quantity or as 32-byte data.
fn slot_value(raw: &str) -> Result<U256, VerificationError> {
    match parse_u256(raw) {
        Ok(slot) => Ok(slot),
        Err(_) => u256_from_be(&parse_bytes(raw)?),
    }
}

fn prove_account<'p>(
    header: &EthHeader,
    address: &Address,
    proof: &'p AccountProof,
) -> Result<(AccountState, &'p AccountEntry), VerificationError> {
    let entry = proof
        .account(address)
        .ok_or_else(|| VerificationError::malformed(format!("no account proof for {address:?}")))?;
    let key = keccak256(address.as_bytes());
    let account = match mpt::verify_proof(header.state_root, key.as_bytes(), &entry.account_proof)? {
        Some(bytes) => AccountState::decode(&bytes)?,
        None => AccountState::empty(),
    };
    Ok((account, entry))
}

fn prove_storage(account: &AccountState, entry: &AccountEntry, slot: U256) -> Result<U256, VerificationError> {
    let storage = entry
        .storage_proof
        .iter()
        .find(|s| slot_value(&s.key).is_ok_and(|k| k == slot))
        .ok_or_else(|| VerificationError::malformed(format!("no storage proof for slot {slot:#x}")))?;

    let mut key = [0u8; 32];
    slot.to_big_endian(&mut key);
    match mpt::verify_proof(account.storage_root, keccak256(&key).as_bytes(), &storage.proof)? {
        Some(bytes) => u256_from_be(Rlp::new(&bytes).data()?),
        None => Ok(U256::zero()),
    }
}

pub(super) fn verify(
    request: &RpcRequest,
    response: &RawResponse,
    header: &EthHeader,
    proof: &AccountProof,
) -> Result<(), VerificationError> {
    check_block_ref(request, header.number, header.hash)?;

    if request.proof_type == ProofType::NodeList {
        return verify_node_list(request, response, header, proof);
    }

    let address = address_param(request)?;
    let (account, entry) = prove_account(header, &address, proof)?;
    let result = &response.result;

    match (request.proof_type, request.method.as_str()) {
        (ProofType::Account, "eth_getBalance") => {
            ensure_eq("balance", value_to_u256(result)?, account.balance)
        }
        (ProofType::Account, "eth_getTransactionCount") => {
            ensure_eq("nonce", value_to_u256(result)?, account.nonce)
        }
        (ProofType::Code, _) => {
            ensure_eq("code hash", keccak256(&value_to_bytes(result)?), account.code_hash)
        }
        (ProofType::Storage, _) => {
            let raw = request
                .param_str(1)
                .ok_or_else(|| VerificationError::malformed("request has no storage slot"))?;
            let value = prove_storage(&account, entry, slot_value(raw)?)?;
            ensure_eq("storage value", value_to_u256(result)?, value)
        }
        (proof_type, method) => Err(VerificationError::malformed(format!(
            "{method} cannot be answered with a {} proof",
            proof_type.as_str()
        ))),
    }
}

/// The listed nodes must hash to the commitment stored in the registry's slot.
fn verify_node_list(
    request: &RpcRequest,
    response: &RawResponse,
    header: &EthHeader,
    proof: &AccountProof,
) -> Result<(), VerificationError> {
    let registry = request
        .chain
        .registry
        .as_ref()
        .ok_or_else(|| VerificationError::malformed(format!("chain {} has no node registry", request.chain)))?;
    let list: NodeList = serde_json::from_value(response.result.clone())?;
    ensure_eq("registry contract", list.contract, registry.address)?;

    let (account, entry) = prove_account(header, &registry.address, proof)?;
    let slot = U256::from_big_endian(registry.nodelist_slot.as_bytes());
    let committed = prove_storage(&account, entry, slot)?;

    let mut stored = [0u8; 32];
    committed.to_big_endian(&mut stored);
    ensure_eq("node list commitment", list.commitment(), H256(stored))
}
