//! Merkle-Patricia trie proof verification.
//!
//! A proof is the list of RLP-encoded nodes on the path from the root to the
//! key. Each referenced node must hash to the reference held by its parent;
//! nodes shorter than 32 bytes are embedded in their parent instead.

use primitive_types::H256;
use rlp::Rlp;

use super::VerificationError;
use crate::crypto::keccak256;

/// Root of the empty trie: `keccak256(rlp(""))`.
pub const EMPTY_TRIE_ROOT: H256 = H256([
    0x56, 0xe8, 0x1f, 0x17, 0x1b, 0xcc, 0x55, 0xa6, 0xff, 0x83, 0x45, 0xe6, 0x92, 0xc0, 0xf8, 0x6e,
    0x5b, 0x48, 0xe0, 0x1b, 0x99, 0x6c, 0xad, 0xc0, 0x01, 0x62, 0x2f, 0xb5, 0xe3, 0x63, 0xb4, 0x21,
]);

enum NodeRef {
    Hash(H256),
    Inline(Vec<u8>),
}

fn nibbles(key: &[u8]) -> Vec<u8> {
    key.iter().flat_map(|b| [b >> 4, b & 0x0f]).collect()
}

/// Decodes a hex-prefix encoded path into `(nibbles, is_leaf)`.
fn decode_path(encoded: &[u8]) -> Result<(Vec<u8>, bool), VerificationError> {
    let Some(&first) = encoded.first() else {
        return Err(VerificationError::malformed("empty trie path"));
    };
    let flag = first >> 4;
    if flag > 3 {
        return Err(VerificationError::malformed(format!("invalid path flag {flag}")));
    }
    let mut path = Vec::with_capacity(encoded.len() * 2);
    if flag & 1 == 1 {
        path.push(first & 0x0f);
    }
    path.extend(nibbles(&encoded[1..]));
    Ok((path, flag & 2 == 2))
}

fn child_ref(item: &Rlp<'_>) -> Result<Option<NodeRef>, VerificationError> {
    if item.is_list() {
        return Ok(Some(NodeRef::Inline(item.as_raw().to_vec())));
    }
    let data = item.data()?;
    match data.len() {
        0 => Ok(None),
        32 => Ok(Some(NodeRef::Hash(H256::from_slice(data)))),
        n => Err(VerificationError::malformed(format!("invalid child reference of {n} bytes"))),
    }
}

/// Verifies `proof` for `key` against `root`.
///
/// Returns the stored value, or `None` when the proof shows the key is absent.
///
/// # Errors
/// `Mismatch` when a node does not hash to its reference, `Malformed` for
/// undecodable or truncated proofs.
pub fn verify_proof(root: H256, key: &[u8], proof: &[impl AsRef<[u8]>]) -> Result<Option<Vec<u8>>, VerificationError> {
    if root == EMPTY_TRIE_ROOT && proof.is_empty() {
        return Ok(None);
    }

    let path = nibbles(key);
    let mut position = 0;
    let mut next_proof = proof.iter();
    let mut expected = NodeRef::Hash(root);

    loop {
        let node = match expected {
            NodeRef::Hash(hash) => {
                let node = next_proof
                    .next()
                    .ok_or_else(|| VerificationError::malformed("proof ends before the key's node"))?
                    .as_ref()
                    .to_vec();
                if keccak256(&node) != hash {
                    return Err(VerificationError::mismatch(format!("trie node does not hash to {hash:?}")));
                }
                node
            }
            NodeRef::Inline(node) => node,
        };

        let rlp = Rlp::new(&node);
        match rlp.item_count()? {
            17 => {
                if position == path.len() {
                    let value = rlp.at(16)?.data()?;
                    return Ok((!value.is_empty()).then(|| value.to_vec()));
                }
                let branch = usize::from(path[position]);
                position += 1;
                match child_ref(&rlp.at(branch)?)? {
                    Some(child) => expected = child,
                    None => return Ok(None),
                }
            }
            2 => {
                let (segment, is_leaf) = decode_path(rlp.at(0)?.data()?)?;
                let rest = &path[position..];
                if is_leaf {
                    if rest != segment.as_slice() {
                        return Ok(None);
                    }
                    return Ok(Some(rlp.at(1)?.data()?.to_vec()));
                }
                if !rest.starts_with(&segment) {
                    return Ok(None);
                }
                position += segment.len();
                match child_ref(&rlp.at(1)?)? {
                    Some(child) => expected = child,
                    None => return Err(VerificationError::malformed("extension without child")),
                }
            }
            n => return Err(VerificationError::malformed(format!("trie node with {n} items"))),
        }
    }
}
