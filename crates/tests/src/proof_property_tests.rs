//! Property tests: tampering with a valid proof never yields a verified result.

use primitive_types::U256;
use proptest::{prelude::*, sample::Index};
use serde_json::{json, Value};
use std::sync::Arc;
use verity_core::{
    proof::{ProofVerifier, TrustAnchorStore, TrustConfig},
    registry::{NodeRegistry, RegistryConfig},
    types::{ChainDescriptor, ChainFamily, JsonRpcRequest, NodeId, ProofType, RawResponse, RpcRequest},
    utils::{encode_hex, parse_bytes},
};

use crate::mock_infrastructure::{account_chain, Address, MockChain, CHAIN_ID, CHAIN_NAME};

/// Byte range of the state root inside an encoded mock header.
const STATE_ROOT_OFFSET: usize = 91;

fn alice() -> Address {
    Address::repeat_byte(0xa1)
}

fn mock_chain() -> MockChain {
    let mut chain = MockChain::new(10);
    for i in 0u64..16 {
        chain.mine(&[(Address::from_low_u64_be(i + 1), U256::from(i * 7 + 3))]);
    }
    chain.mine(&[(alice(), U256::from(1_000u64))]);
    chain.mine_to(30);
    chain
}

fn verifier(chain: &MockChain) -> ProofVerifier {
    let registry = Arc::new(NodeRegistry::new(RegistryConfig::default()));
    let verifier = ProofVerifier::new(TrustConfig::default(), Arc::new(TrustAnchorStore::new()), registry);
    verifier.configure_chain(&account_chain(chain, &["a"]));
    verifier
}

fn balance_request() -> RpcRequest {
    RpcRequest {
        method: "eth_getBalance".to_string(),
        params: vec![json!(encode_hex(alice().as_bytes())), json!("latest")],
        chain: Arc::new(ChainDescriptor::new(CHAIN_ID, CHAIN_NAME, ChainFamily::Account)),
        proof_type: ProofType::Account,
        finality: 0,
    }
}

fn honest_response(chain: &MockChain, request: &RpcRequest) -> RawResponse {
    let wire = JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        id: 1,
        method: request.method.clone(),
        params: request.params.clone(),
        in3: None,
    };
    let (result, proof) = chain.balance_answer(&wire, chain.tip());
    RawResponse { node: NodeId::new("http://a.node.test"), id: 1, result, proof: Some(proof) }
}

fn account_nodes(proof: &mut Value) -> &mut Vec<Value> {
    let accounts = proof["accounts"].as_object_mut().unwrap();
    let entry = accounts.values_mut().next().unwrap();
    entry["accountProof"].as_array_mut().unwrap()
}

fn flip(hex_value: &mut Value, index: Index, mask: u8) {
    let mut bytes = parse_bytes(hex_value.as_str().unwrap()).unwrap();
    let at = index.index(bytes.len());
    bytes[at] ^= mask;
    *hex_value = json!(encode_hex(&bytes));
}

#[test]
fn test_untampered_proof_verifies() {
    let chain = mock_chain();
    let request = balance_request();
    let verification = verifier(&chain).verify(&honest_response(&chain, &request), &request).unwrap();
    assert_eq!(verification.result.value(), &json!("0x3e8"));
    assert_eq!(verification.result.proving_block_number(), 30);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_corrupted_trie_node_never_verifies(node in any::<Index>(), byte in any::<Index>(), mask in 1u8..) {
        let chain = mock_chain();
        let request = balance_request();
        let mut response = honest_response(&chain, &request);

        let proof = response.proof.as_mut().unwrap();
        let nodes = account_nodes(proof);
        let at = node.index(nodes.len());
        flip(&mut nodes[at], byte, mask);

        prop_assert!(verifier(&chain).verify(&response, &request).is_err());
    }

    #[test]
    fn prop_corrupted_state_root_never_verifies(byte in 0usize..32, mask in 1u8..) {
        let chain = mock_chain();
        let request = balance_request();
        let mut response = honest_response(&chain, &request);

        let proof = response.proof.as_mut().unwrap();
        let headers = proof["headers"].as_array_mut().unwrap();
        let proving = headers.len() - 1;
        let mut raw = parse_bytes(headers[proving].as_str().unwrap()).unwrap();
        raw[STATE_ROOT_OFFSET + byte] ^= mask;
        headers[proving] = json!(encode_hex(&raw));

        prop_assert!(verifier(&chain).verify(&response, &request).is_err());
    }

    #[test]
    fn prop_misreported_balance_never_verifies(delta in 1u64..) {
        let chain = mock_chain();
        let request = balance_request();
        let mut response = honest_response(&chain, &request);
        response.result = json!(format!("{:#x}", U256::from(1_000u64) + U256::from(delta)));

        prop_assert!(verifier(&chain).verify(&response, &request).is_err());
    }
}
