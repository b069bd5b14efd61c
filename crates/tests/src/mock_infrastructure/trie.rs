//! In-memory Merkle-Patricia trie that can emit inclusion proofs.
//!
//! Rebuilt from the entry list on every call; fine for the handful of keys a
//! mock chain holds.

use primitive_types::H256;
use rlp::RlpStream;
use sha3::{Digest, Keccak256};

type Entries = [(Vec<u8>, Vec<u8>)];

pub fn keccak(data: &[u8]) -> H256 {
    H256::from_slice(&Keccak256::digest(data))
}

fn nibbles(key: &[u8]) -> Vec<u8> {
    key.iter().flat_map(|b| [b >> 4, b & 0x0f]).collect()
}

/// Hex-prefix encoding of a nibble path.
fn compact(path: &[u8], leaf: bool) -> Vec<u8> {
    let flag = (if leaf { 2 } else { 0 }) + (path.len() % 2) as u8;
    let mut out = Vec::with_capacity(path.len() / 2 + 1);
    let rest = if path.len() % 2 == 1 {
        out.push((flag << 4) | path[0]);
        &path[1..]
    } else {
        out.push(flag << 4);
        path
    };
    out.extend(rest.chunks(2).map(|pair| (pair[0] << 4) | pair[1]));
    out
}

fn common_prefix(entries: &Entries) -> usize {
    let first = &entries[0].0;
    (0..first.len())
        .take_while(|&i| entries.iter().all(|(path, _)| path.get(i) == Some(&first[i])))
        .count()
}

fn strip(entries: &Entries, count: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
    entries.iter().map(|(p, v)| (p[count..].to_vec(), v.clone())).collect()
}

fn branch_entries(entries: &Entries, nibble: u8) -> Vec<(Vec<u8>, Vec<u8>)> {
    entries
        .iter()
        .filter(|(p, _)| p.first() == Some(&nibble))
        .map(|(p, v)| (p[1..].to_vec(), v.clone()))
        .collect()
}

/// Encodes the node over `entries`.
fn encode(entries: &Entries) -> Vec<u8> {
    if entries.len() == 1 {
        let (path, value) = &entries[0];
        let mut s = RlpStream::new_list(2);
        s.append(&compact(path, true));
        s.append(value);
        return s.out().to_vec();
    }

    let shared = common_prefix(entries);
    if shared > 0 {
        let mut s = RlpStream::new_list(2);
        s.append(&compact(&entries[0].0[..shared], false));
        append_child(&mut s, &encode(&strip(entries, shared)));
        return s.out().to_vec();
    }

    let mut s = RlpStream::new_list(17);
    for nibble in 0u8..16 {
        let branch = branch_entries(entries, nibble);
        if branch.is_empty() {
            s.append_empty_data();
        } else {
            append_child(&mut s, &encode(&branch));
        }
    }
    match entries.iter().find(|(p, _)| p.is_empty()) {
        Some((_, value)) => s.append(value),
        None => s.append_empty_data(),
    };
    s.out().to_vec()
}

fn append_child(s: &mut RlpStream, child: &[u8]) {
    if child.len() < 32 {
        s.append_raw(child, 1);
    } else {
        s.append(&keccak(child).as_bytes().to_vec());
    }
}

/// Appends the hashed nodes on the way to `target`.
fn walk(entries: &Entries, target: &[u8], proof: &mut Vec<Vec<u8>>) {
    let node = encode(entries);
    if proof.is_empty() || node.len() >= 32 {
        proof.push(node);
    }
    if entries.len() == 1 {
        return;
    }

    let shared = common_prefix(entries);
    if shared > 0 {
        if target.len() >= shared && target[..shared] == entries[0].0[..shared] {
            walk(&strip(entries, shared), &target[shared..], proof);
        }
        return;
    }
    if let Some(&nibble) = target.first() {
        let branch = branch_entries(entries, nibble);
        if !branch.is_empty() {
            walk(&branch, &target[1..], proof);
        }
    }
}

/// A trie over a set of key/value pairs.
#[derive(Debug, Clone, Default)]
pub struct MockTrie {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
}

impl MockTrie {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &[u8], value: Vec<u8>) {
        let path = nibbles(key);
        self.entries.retain(|(p, _)| *p != path);
        self.entries.push((path, value));
    }

    pub fn root(&self) -> H256 {
        if self.entries.is_empty() {
            return keccak(&[0x80]);
        }
        keccak(&encode(&self.entries))
    }

    /// Nodes on the path to `key`, root first.
    pub fn proof(&self, key: &[u8]) -> Vec<Vec<u8>> {
        let mut proof = Vec::new();
        if !self.entries.is_empty() {
            walk(&self.entries, &nibbles(key), &mut proof);
        }
        proof
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verity_core::proof::mpt::{verify_proof, EMPTY_TRIE_ROOT};

    #[test]
    fn test_empty_trie_root() {
        assert_eq!(MockTrie::new().root(), EMPTY_TRIE_ROOT);
    }

    #[test]
    fn test_proofs_verify_for_every_key() {
        let mut trie = MockTrie::new();
        for i in 0u8..20 {
            trie.insert(keccak(&[i]).as_bytes(), vec![i; 40]);
        }
        let root = trie.root();
        for i in 0u8..20 {
            let key = keccak(&[i]);
            let proof = trie.proof(key.as_bytes());
            assert_eq!(verify_proof(root, key.as_bytes(), &proof).unwrap(), Some(vec![i; 40]));
        }
    }

    #[test]
    fn test_absent_key_proves_absence() {
        let mut trie = MockTrie::new();
        trie.insert(keccak(&[1]).as_bytes(), vec![1; 40]);
        trie.insert(keccak(&[2]).as_bytes(), vec![2; 40]);
        let missing = keccak(&[9]);
        let proof = trie.proof(missing.as_bytes());
        assert_eq!(verify_proof(trie.root(), missing.as_bytes(), &proof).unwrap(), None);
    }
}
