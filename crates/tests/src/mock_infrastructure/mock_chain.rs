//! A tiny account chain with real RLP headers and state tries.
//!
//! Every block carries the balances of a few accounts; the header's state
//! root commits to them, so proofs served from here pass the real verifier.
//! Forging helpers produce proofs that are well formed but lie.

use primitive_types::{H160, H256, U256};
use rlp::RlpStream;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use verity_core::{
    config::CheckpointConfig,
    proof::{eth::KECCAK_EMPTY, mpt::EMPTY_TRIE_ROOT},
    types::JsonRpcRequest,
    utils::{encode_hex, parse_quantity},
};

use super::trie::{keccak, MockTrie};

pub type Address = H160;

fn trimmed(value: U256) -> Vec<u8> {
    let mut bytes = [0u8; 32];
    value.to_big_endian(&mut bytes);
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(32);
    bytes[first..].to_vec()
}

/// RLP account body `[nonce, balance, storageRoot, codeHash]`.
pub fn encode_account(balance: U256) -> Vec<u8> {
    let mut s = RlpStream::new_list(4);
    s.append(&0u64);
    s.append(&trimmed(balance));
    s.append(&EMPTY_TRIE_ROOT.as_bytes().to_vec());
    s.append(&KECCAK_EMPTY.as_bytes().to_vec());
    s.out().to_vec()
}

/// A 15-field header with the given parent, number and state root.
pub fn encode_header(number: u64, parent: H256, state_root: H256) -> Vec<u8> {
    let empty = EMPTY_TRIE_ROOT;
    let mut s = RlpStream::new_list(15);
    s.append(&parent.as_bytes().to_vec());
    s.append(&keccak(&[0xc0]).as_bytes().to_vec());
    s.append(&vec![0u8; 20]);
    s.append(&state_root.as_bytes().to_vec());
    s.append(&empty.as_bytes().to_vec());
    s.append(&empty.as_bytes().to_vec());
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

fn state_trie(balances: &BTreeMap<Address, U256>) -> MockTrie {
    let mut trie = MockTrie::new();
    for (address, balance) in balances {
        trie.insert(keccak(address.as_bytes()).as_bytes(), encode_account(*balance));
    }
    trie
}

#[derive(Debug, Clone)]
struct Block {
    header: Vec<u8>,
    hash: H256,
    balances: BTreeMap<Address, U256>,
}

/// An append-only chain starting at a trusted checkpoint block.
#[derive(Debug, Clone)]
pub struct MockChain {
    first: u64,
    blocks: Vec<Block>,
}

impl MockChain {
    /// Starts the chain at block `first`, which becomes the checkpoint.
    pub fn new(first: u64) -> Self {
        let mut chain = Self { first, blocks: Vec::new() };
        chain.push(H256::repeat_byte(0x11), BTreeMap::new());
        chain
    }

    fn push(&mut self, parent: H256, balances: BTreeMap<Address, U256>) {
        let number = self.first + self.blocks.len() as u64;
        let header = encode_header(number, parent, state_trie(&balances).root());
        let hash = keccak(&header);
        self.blocks.push(Block { header, hash, balances });
    }

    /// Appends a block applying `changes` on top of the tip's balances.
    pub fn mine(&mut self, changes: &[(Address, U256)]) -> u64 {
        let parent = self.blocks[self.blocks.len() - 1].clone();
        let mut balances = parent.balances;
        balances.extend(changes.iter().copied());
        self.push(parent.hash, balances);
        self.tip()
    }

    /// A competing branch sharing this chain's blocks up to `number`.
    pub fn fork(&self, number: u64) -> Self {
        let kept = (number - self.first + 1) as usize;
        Self { first: self.first, blocks: self.blocks[..kept].to_vec() }
    }

    /// Appends empty blocks until the tip is `number`.
    pub fn mine_to(&mut self, number: u64) {
        while self.tip() < number {
            self.mine(&[]);
        }
    }

    pub fn tip(&self) -> u64 {
        self.first + self.blocks.len() as u64 - 1
    }

    fn block(&self, number: u64) -> &Block {
        &self.blocks[(number - self.first) as usize]
    }

    pub fn hash(&self, number: u64) -> H256 {
        self.block(number).hash
    }

    pub fn checkpoint(&self) -> CheckpointConfig {
        CheckpointConfig { number: self.first, hash: self.hash(self.first) }
    }

    pub fn balance(&self, address: &Address, number: u64) -> U256 {
        self.block(number).balances.get(address).copied().unwrap_or_default()
    }

    /// Lowest header a node with the client's `verifiedHashes` needs to send:
    /// the block after the highest matching hint at or below `proving`.
    fn segment_start(&self, request: &JsonRpcRequest, proving: u64) -> u64 {
        let linked = request
            .in3
            .iter()
            .flat_map(|meta| meta.verified_hashes.iter())
            .filter_map(|hint| parse_quantity(&hint.block).ok().map(|number| (number, hint.hash)))
            .filter(|(number, hash)| {
                *number >= self.first && *number <= proving && *number <= self.tip() && self.hash(*number) == *hash
            })
            .map(|(number, _)| number)
            .max()
            .unwrap_or(self.first);
        (linked + 1).min(proving)
    }

    /// Proving block for a `[address, blockParameter]` request as seen by a
    /// node whose head is `view_tip`.
    fn proving_block(request: &JsonRpcRequest, view_tip: u64) -> u64 {
        match request.params.get(1).and_then(Value::as_str) {
            Some(raw) => parse_quantity(raw).unwrap_or(view_tip),
            None => view_tip,
        }
    }

    fn address(request: &JsonRpcRequest) -> Address {
        let raw = request.params.first().and_then(Value::as_str).unwrap_or_default();
        let bytes = hex::decode(raw.trim_start_matches("0x")).unwrap_or_default();
        if bytes.len() == 20 {
            Address::from_slice(&bytes)
        } else {
            Address::zero()
        }
    }

    fn account_payload(&self, request: &JsonRpcRequest, view_tip: u64, trie: &MockTrie, proving: u64) -> Value {
        let address = Self::address(request);
        let start = self.segment_start(request, proving);
        let headers: Vec<String> = (start..=view_tip).map(|n| encode_hex(&self.block(n).header)).collect();
        let nodes: Vec<String> =
            trie.proof(keccak(address.as_bytes()).as_bytes()).iter().map(|n| encode_hex(n)).collect();
        json!({
            "type": "accountProof",
            "headers": headers,
            "block": format!("{proving:#x}"),
            "accounts": {
                encode_hex(address.as_bytes()): { "accountProof": nodes, "storageProof": [] }
            }
        })
    }

    /// Honest `eth_getBalance` answer: `(result, proof)`.
    pub fn balance_answer(&self, request: &JsonRpcRequest, view_tip: u64) -> (Value, Value) {
        let proving = Self::proving_block(request, view_tip);
        let balance = self.balance(&Self::address(request), proving);
        let trie = state_trie(&self.block(proving).balances);
        (json!(format!("{balance:#x}")), self.account_payload(request, view_tip, &trie, proving))
    }

    /// A lie: claims `fake` and backs it with a trie that does not match the
    /// real state root.
    pub fn forged_balance_answer(&self, request: &JsonRpcRequest, view_tip: u64, fake: U256) -> (Value, Value) {
        let proving = Self::proving_block(request, view_tip);
        let mut balances = self.block(proving).balances.clone();
        balances.insert(Self::address(request), fake);
        let trie = state_trie(&balances);
        (json!(format!("{fake:#x}")), self.account_payload(request, view_tip, &trie, proving))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verity_core::proof::eth::EthHeader;

    #[test]
    fn test_headers_link_and_commit_to_state() {
        let alice = Address::repeat_byte(0xa1);
        let mut chain = MockChain::new(10);
        chain.mine(&[(alice, U256::from(5u64))]);
        chain.mine_to(14);

        assert_eq!(chain.tip(), 14);
        for number in 11..=14 {
            let header = EthHeader::decode(&chain.block(number).header).unwrap();
            assert_eq!(header.number, number);
            assert_eq!(header.parent, chain.hash(number - 1));
            assert_eq!(header.hash, chain.hash(number));
        }
        assert_eq!(chain.balance(&alice, 10), U256::zero());
        assert_eq!(chain.balance(&alice, 14), U256::from(5u64));
    }

    #[test]
    fn test_fork_shares_prefix_only() {
        let alice = Address::repeat_byte(0xa1);
        let mut main = MockChain::new(10);
        main.mine(&[(alice, U256::from(1u64))]);
        main.mine_to(13);

        let mut fork = main.fork(11);
        fork.mine(&[(alice, U256::from(2u64))]);
        assert_eq!(fork.tip(), 12);
        assert_eq!(fork.hash(11), main.hash(11));
        assert_ne!(fork.hash(12), main.hash(12));
        assert_eq!(fork.balance(&alice, 12), U256::from(2u64));
    }
}
