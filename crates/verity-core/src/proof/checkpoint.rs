//! Checkpoint-attested chains: committee signatures or a zero-knowledge proof
//! vouch for the result at a checkpoint, with no header chain involved.

use primitive_types::H256;
use serde_json::Value;
use std::collections::HashSet;

use super::{
    payload::{CheckpointProof, ProofPayload, ZkProof},
    Anchoring, ChainTrust, ProofVerifier, Proven, VerificationError,
};
use crate::{
    crypto::keccak256,
    types::{Address, ChainId, ProofType, RawResponse, RpcRequest},
    utils::canonical_json,
};

/// Digest of a canonically encoded result.
#[must_use]
pub fn result_digest(result: &Value) -> H256 {
    keccak256(&canonical_json(result))
}

/// Message committee members sign:
/// `keccak256(chain_id_be8 ‖ block_be8 ‖ block_hash ‖ result_digest)`.
#[must_use]
pub fn checkpoint_digest(chain_id: ChainId, block: u64, block_hash: H256, result: &Value) -> H256 {
    let mut message = Vec::with_capacity(80);
    message.extend_from_slice(&chain_id.to_be_bytes());
    message.extend_from_slice(&block.to_be_bytes());
    message.extend_from_slice(block_hash.as_bytes());
    message.extend_from_slice(result_digest(result).as_bytes());
    keccak256(&message)
}

fn verify_committee(
    trust: &ChainTrust,
    request: &RpcRequest,
    result: &Value,
    proof: &CheckpointProof,
) -> Result<(), VerificationError> {
    let committee = trust
        .committee
        .as_ref()
        .ok_or_else(|| VerificationError::malformed("chain has no signing committee"))?;
    let digest = checkpoint_digest(request.chain.id, proof.checkpoint.block.0, proof.checkpoint.hash, result);
    let members: HashSet<&Address> = committee.members.iter().collect();
    let signed: HashSet<Address> = proof
        .signatures
        .iter()
        .filter_map(|signature| signature.recover(&digest).ok())
        .filter(|signer| members.contains(signer))
        .collect();
    if signed.len() < committee.threshold {
        return Err(VerificationError::mismatch(format!(
            "{} of {} required committee signatures",
            signed.len(),
            committee.threshold
        )));
    }
    Ok(())
}

fn verify_zk(
    verifier: &ProofVerifier,
    trust: &ChainTrust,
    result: &Value,
    proof: &ZkProof,
) -> Result<(), VerificationError> {
    let name = trust
        .zk_verifier
        .as_deref()
        .ok_or_else(|| VerificationError::malformed("chain has no proof system configured"))?;
    let inputs: Vec<Vec<u8>> = proof.public_inputs.iter().map(|input| input.0.clone()).collect();
    let digest = result_digest(result);
    if !inputs.iter().any(|input| input.as_slice() == digest.as_bytes()) {
        return Err(VerificationError::mismatch("proof does not commit to the returned result"));
    }
    if !inputs.iter().any(|input| input.as_slice() == proof.checkpoint.hash.as_bytes()) {
        return Err(VerificationError::mismatch("proof does not commit to its checkpoint"));
    }
    verifier.run_proof_system(name, &proof.verifier_key.0, &inputs, &proof.proof.0)
}

pub(super) fn verify(
    verifier: &ProofVerifier,
    trust: &ChainTrust,
    request: &RpcRequest,
    response: &RawResponse,
    payload: ProofPayload,
) -> Result<Proven, VerificationError> {
    let result = &response.result;
    let checkpoint = match (request.proof_type, payload) {
        (ProofType::Checkpoint, ProofPayload::CheckpointProof(proof)) => {
            verify_committee(trust, request, result, &proof)?;
            proof.checkpoint
        }
        (ProofType::ZkProof, ProofPayload::ZkProof(proof)) => {
            verify_zk(verifier, trust, result, &proof)?;
            proof.checkpoint
        }
        (expected, payload) => {
            return Err(VerificationError::malformed(format!(
                "{} cannot prove a {} request",
                payload.kind(),
                expected.as_str()
            )))
        }
    };

    Ok(Proven {
        value: result.clone(),
        number: checkpoint.block.0,
        hash: checkpoint.hash,
        anchoring: Anchoring::Final,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{ChainConfig, CommitteeConfig},
        crypto::test_keys::{address_of, sign, signing_key},
        proof::{
            test_support::{verifier, StaticSigners},
            ProofSystem,
        },
        types::{ChainDescriptor, ChainFamily, NodeId},
        utils::hex::encode_hex,
    };
    use serde_json::json;
    use std::sync::Arc;

    const CHAIN: ChainId = 0x5a;

    fn request(proof_type: ProofType) -> RpcRequest {
        RpcRequest {
            method: "getAccountInfo".into(),
            params: vec![json!("acct")],
            chain: Arc::new(ChainDescriptor::new(CHAIN, "attested", ChainFamily::Checkpoint)),
            proof_type,
            finality: 0,
        }
    }

    fn committee_chain(members: Vec<Address>, threshold: usize) -> ChainConfig {
        let mut chain = ChainConfig::new(CHAIN, "attested", ChainFamily::Checkpoint);
        chain.committee = Some(CommitteeConfig { members, threshold });
        chain
    }

    #[test]
    fn test_digest_is_key_order_independent() {
        let a = json!({"x": 1, "y": [true, null]});
        let b: Value = serde_json::from_str(r#"{"y":[true,null],"x":1}"#).unwrap();
        assert_eq!(checkpoint_digest(1, 2, H256::zero(), &a), checkpoint_digest(1, 2, H256::zero(), &b));
        assert_ne!(checkpoint_digest(1, 2, H256::zero(), &a), checkpoint_digest(1, 3, H256::zero(), &a));
    }

    #[test]
    fn test_committee_threshold() {
        let keys = [signing_key(1), signing_key(2), signing_key(3)];
        let verifier = verifier(StaticSigners::with([]));
        verifier.configure_chain(&committee_chain(keys.iter().map(address_of).collect(), 2));

        let result = json!({"balance": "0x10"});
        let hash = H256::repeat_byte(0x33);
        let digest = checkpoint_digest(CHAIN, 500, hash, &result);
        let outsider = signing_key(9);
        let proof = |signers: &[&k256::ecdsa::SigningKey]| {
            let signatures: Vec<_> = signers.iter().map(|k| sign(k, &digest)).collect();
            json!({"type": "checkpointProof", "checkpoint": {"block": "0x1f4", "hash": encode_hex(hash.as_bytes())}, "signatures": signatures})
        };
        let response = |proof: Value| RawResponse {
            node: NodeId::from("https://attested"),
            id: 1,
            result: result.clone(),
            proof: Some(proof),
        };

        let outcome = verifier.verify(&response(proof(&[&keys[0], &keys[2]])), &request(ProofType::Checkpoint)).unwrap();
        assert_eq!(outcome.result.proving_block_number(), 500);
        assert_eq!(outcome.result.proving_block_hash(), hash);

        for signers in [&[&keys[0], &keys[0]][..], &[&keys[1], &outsider][..]] {
            assert!(matches!(
                verifier.verify(&response(proof(signers)), &request(ProofType::Checkpoint)),
                Err(VerificationError::Mismatch(_))
            ));
        }
    }

    /// Accepts proofs equal to `keccak256` of the concatenated inputs.
    struct HashProofSystem;

    impl ProofSystem for HashProofSystem {
        fn verify(&self, _verifier_key: &[u8], public_inputs: &[Vec<u8>], proof: &[u8]) -> Result<bool, String> {
            if proof.len() != 32 {
                return Err(format!("proof of {} bytes", proof.len()));
            }
            Ok(keccak256(&public_inputs.concat()).as_bytes() == proof)
        }
    }

    #[test]
    fn test_zk_proof_system() {
        let verifier = verifier(StaticSigners::with([]));
        let mut chain = committee_chain(vec![Address::repeat_byte(1)], 1);
        chain.zk_verifier = Some("hash-snark".to_string());
        verifier.configure_chain(&chain);
        verifier.register_proof_system("hash-snark", vec![0xaa; 4], Arc::new(HashProofSystem));

        let result = json!("0x2a");
        let hash = H256::repeat_byte(0x44);
        let inputs = [result_digest(&result).as_bytes().to_vec(), hash.as_bytes().to_vec()];
        let payload = |key: &[u8], proof: &[u8]| {
            json!({
                "type": "zkProof",
                "checkpoint": {"block": 9, "hash": encode_hex(hash.as_bytes())},
                "verifierKey": encode_hex(key),
                "publicInputs": inputs.iter().map(|i| encode_hex(i)).collect::<Vec<_>>(),
                "proof": encode_hex(proof)
            })
        };
        let response = |proof: Value| RawResponse {
            node: NodeId::from("https://attested"),
            id: 1,
            result: result.clone(),
            proof: Some(proof),
        };
        let good = keccak256(&inputs.concat());

        assert!(verifier.verify(&response(payload(&[0xaa; 4], good.as_bytes())), &request(ProofType::ZkProof)).is_ok());
        assert!(matches!(
            verifier.verify(&response(payload(&[0xbb; 4], good.as_bytes())), &request(ProofType::ZkProof)),
            Err(VerificationError::Mismatch(_))
        ));
        assert!(matches!(
            verifier.verify(&response(payload(&[0xaa; 4], &[0u8; 32])), &request(ProofType::ZkProof)),
            Err(VerificationError::Mismatch(_))
        ));
        assert!(matches!(
            verifier.verify(&response(payload(&[0xaa; 4], &[0u8; 3])), &request(ProofType::ZkProof)),
            Err(VerificationError::Malformed(_))
        ));
    }
}
