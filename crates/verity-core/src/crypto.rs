//! Hash and signature primitives used by the proof verifier.

use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, VerifyingKey};
use primitive_types::{H160, H256};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sha3::Keccak256;
use thiserror::Error;

use crate::utils::hex::{parse_h256, value_to_u64};

/// Errors from signature recovery.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid recovery id {0}")]
    InvalidRecoveryId(u64),
    #[error("invalid signature encoding")]
    InvalidSignature,
    #[error("public key recovery failed")]
    RecoveryFailed,
}

/// Keccak-256 digest.
#[must_use]
pub fn keccak256(data: &[u8]) -> H256 {
    H256::from_slice(&Keccak256::digest(data))
}

/// SHA-256 digest.
#[must_use]
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Double SHA-256 as used for UTXO headers, transactions and Merkle nodes.
#[must_use]
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    sha256(&sha256(data))
}

/// A recoverable secp256k1 signature in `{r, s, v}` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecoverableSignature {
    pub r: H256,
    pub s: H256,
    pub v: u8,
}

#[derive(Deserialize)]
struct WireSignature {
    r: String,
    s: String,
    v: Value,
}

impl<'de> Deserialize<'de> for RecoverableSignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;

        let wire = WireSignature::deserialize(deserializer)?;
        let r = parse_h256(&wire.r).map_err(D::Error::custom)?;
        let s = parse_h256(&wire.s).map_err(D::Error::custom)?;
        let v = value_to_u64(&wire.v).map_err(D::Error::custom)?;
        let v = u8::try_from(v).map_err(|_| D::Error::custom(format!("v out of range: {v}")))?;
        Ok(Self { r, s, v })
    }
}

impl RecoverableSignature {
    /// Normalizes `v` (0, 1, 27 or 28) to a recovery id.
    fn recovery_id(&self) -> Result<RecoveryId, CryptoError> {
        let id = match self.v {
            0 | 27 => 0,
            1 | 28 => 1,
            other => return Err(CryptoError::InvalidRecoveryId(u64::from(other))),
        };
        RecoveryId::from_byte(id).ok_or(CryptoError::InvalidRecoveryId(u64::from(self.v)))
    }

    /// Recovers the signer address of `message_hash`.
    ///
    /// # Errors
    /// Returns [`CryptoError`] for malformed signatures or failed recovery.
    pub fn recover(&self, message_hash: &H256) -> Result<H160, CryptoError> {
        ecrecover(message_hash, self)
    }
}

/// Recovers the Ethereum-style address that produced `signature` over `message_hash`.
///
/// # Errors
/// Returns [`CryptoError`] for malformed signatures or failed recovery.
pub fn ecrecover(message_hash: &H256, signature: &RecoverableSignature) -> Result<H160, CryptoError> {
    let recovery_id = signature.recovery_id()?;

    let mut bytes = [0u8; 64];
    bytes[..32].copy_from_slice(signature.r.as_bytes());
    bytes[32..].copy_from_slice(signature.s.as_bytes());
    let sig = EcdsaSignature::from_slice(&bytes).map_err(|_| CryptoError::InvalidSignature)?;

    let key = VerifyingKey::recover_from_prehash(message_hash.as_bytes(), &sig, recovery_id)
        .map_err(|_| CryptoError::RecoveryFailed)?;
    Ok(public_key_address(&key))
}

/// Derives the address of a secp256k1 public key: the last 20 bytes of
/// `keccak256(uncompressed_point[1..])`.
#[must_use]
pub fn public_key_address(key: &VerifyingKey) -> H160 {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    H160::from_slice(&hash.as_bytes()[12..])
}


#[cfg(test)]
mod tests {
    use super::{test_keys::*, *};
    use serde_json::json;

    #[test]
    fn test_keccak_of_empty_input() {
        assert_eq!(
            format!("{:x}", keccak256(&[])),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_sha256d_known_vector() {
        // sha256d("hello")
        assert_eq!(
            hex::encode(sha256d(b"hello")),
            "9595c9df90075148eb06860365df33584b75bff782a510c6cd4883a419833d50"
        );
    }

    #[test]
    fn test_recover_roundtrip() {
        let key = signing_key(3);
        let message = keccak256(b"block attestation");
        let signature = sign(&key, &message);
        assert_eq!(ecrecover(&message, &signature).unwrap(), address_of(&key));
    }

    #[test]
    fn test_recover_wrong_message_yields_other_address() {
        let key = signing_key(4);
        let signature = sign(&key, &keccak256(b"a"));
        let recovered = ecrecover(&keccak256(b"b"), &signature);
        assert!(recovered.map_or(true, |address| address != address_of(&key)));
    }

    #[test]
    fn test_invalid_recovery_id() {
        let signature = RecoverableSignature { r: H256::repeat_byte(1), s: H256::repeat_byte(1), v: 5 };
        assert_eq!(
            ecrecover(&H256::zero(), &signature),
            Err(CryptoError::InvalidRecoveryId(5))
        );
    }

    #[test]
    fn test_signature_deserializes_from_wire() {
        let wire = json!({
            "r": format!("0x{}", "01".repeat(32)),
            "s": format!("0x{}", "02".repeat(32)),
            "v": "0x1b"
        });
        let signature: RecoverableSignature = serde_json::from_value(wire).unwrap();
        assert_eq!(signature.v, 27);
        assert_eq!(signature.s, H256::repeat_byte(2));
    }
}
