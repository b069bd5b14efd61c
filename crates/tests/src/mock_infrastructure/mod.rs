//! Mock infrastructure for exercising the client without a network.
//!
//! ## Components
//!
//! - `MockChain`: an account chain with real RLP headers and state tries
//! - `ScriptedTransport`: a `Transport` whose endpoints answer from closures
//! - `MockTrie`: a Merkle-Patricia trie that emits inclusion proofs
//! - Test helpers for client configuration
//!
//! ## Usage
//!
//! ```ignore
//! use tests::mock_infrastructure::{MockChain, ScriptedTransport, Reply};
//!
//! let chain = Arc::new(MockChain::new(10));
//! let honest = Arc::clone(&chain);
//! let transport = ScriptedTransport::new()
//!     .on(&node_url("a"), move |req, _| honest.balance_answer(req, 14).into());
//! ```

pub mod mock_chain;
pub mod scripted_transport;
pub mod test_helpers;
pub mod trie;

pub use mock_chain::{Address, MockChain};
pub use scripted_transport::{Reply, Responder, ScriptedTransport};
pub use test_helpers::*;
pub use trie::{keccak, MockTrie};
