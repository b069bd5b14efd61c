use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::{types::RpcRequest, utils::digest_json_value};

/// Cache key of a logical call: SHA-256 over `(method, params, chain id, finality)`.
///
/// Params go through the canonical traversal, so `{"a":1,"b":2}` and
/// `{"b":2,"a":1}` share a fingerprint while `"1"` and `1` do not.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    #[must_use]
    pub fn of(request: &RpcRequest) -> Self {
        Self::compute(&request.method, &request.params, request.chain.id, request.finality)
    }

    #[must_use]
    pub fn compute(method: &str, params: &[Value], chain_id: u64, finality: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update((method.len() as u64).to_be_bytes());
        hasher.update(method.as_bytes());
        hasher.update((params.len() as u64).to_be_bytes());
        for param in params {
            digest_json_value(param, &mut hasher);
        }
        hasher.update(chain_id.to_be_bytes());
        hasher.update(finality.to_be_bytes());
        Self(hasher.finalize().into())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0[..8]))
    }
}
