//! Encoding helpers shared by the builder, verifier and cache.
//!
//! - `hex`: `0x`-prefixed byte strings and quantities as used on the wire
//! - `block_param`: block number / tag / hash parameters
//! - `canonical`: key-sorted, type-tagged JSON traversal for fingerprints and signed digests

pub mod block_param;
pub mod canonical;
pub mod hex;

pub use block_param::{BlockParameter, BlockRef, BlockTag};
pub use canonical::{canonical_json, digest_json_value};
pub use hex::{encode_hex, format_quantity, parse_bytes, parse_h256, parse_quantity, HexError};
