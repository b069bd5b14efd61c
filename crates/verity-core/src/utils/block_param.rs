//! Block parameter parsing for account-chain methods.

use primitive_types::H256;
use serde_json::Value;

use super::hex::{parse_h256, parse_quantity, HexError};

/// Standard block tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Latest,
    Earliest,
    Pending,
    Safe,
    Finalized,
}

/// A block reference as accepted by state methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRef {
    Number(u64),
    Hash(H256),
    Tag(BlockTag),
}

impl BlockRef {
    /// Whether results for this reference change as the chain advances.
    #[must_use]
    pub fn is_moving(&self) -> bool {
        matches!(
            self,
            Self::Tag(BlockTag::Latest | BlockTag::Pending | BlockTag::Safe | BlockTag::Finalized)
        )
    }

    /// Whether the proving block `(number, hash)` satisfies this reference.
    ///
    /// Tags other than `earliest` accept any proving block.
    #[must_use]
    pub fn admits(&self, number: u64, hash: H256) -> bool {
        match self {
            Self::Number(n) => *n == number,
            Self::Hash(h) => *h == hash,
            Self::Tag(BlockTag::Earliest) => number == 0,
            Self::Tag(_) => true,
        }
    }
}

/// Block parameter parser.
pub struct BlockParameter;

impl BlockParameter {
    /// Parses a block parameter string: a tag, a hex quantity or a 32-byte hash.
    ///
    /// # Errors
    /// Returns [`HexError`] if the input is none of these.
    pub fn parse(param: &str) -> Result<BlockRef, HexError> {
        match param {
            "latest" => Ok(BlockRef::Tag(BlockTag::Latest)),
            "earliest" => Ok(BlockRef::Tag(BlockTag::Earliest)),
            "pending" => Ok(BlockRef::Tag(BlockTag::Pending)),
            "safe" => Ok(BlockRef::Tag(BlockTag::Safe)),
            "finalized" => Ok(BlockRef::Tag(BlockTag::Finalized)),
            s if s.len() == 66 => parse_h256(s).map(BlockRef::Hash),
            s => parse_quantity(s).map(BlockRef::Number),
        }
    }

    /// Parses an optional JSON block parameter. A missing parameter means `latest`.
    ///
    /// # Errors
    /// Returns [`HexError`] for values that are not valid block parameters.
    pub fn from_param(param: Option<&Value>) -> Result<BlockRef, HexError> {
        match param {
            None | Some(Value::Null) => Ok(BlockRef::Tag(BlockTag::Latest)),
            Some(Value::String(s)) => Self::parse(s),
            Some(Value::Object(map)) => {
                let hash = map
                    .get("blockHash")
                    .and_then(Value::as_str)
                    .ok_or_else(|| HexError::NotAString("blockHash".to_string()))?;
                parse_h256(hash).map(BlockRef::Hash)
            }
            Some(other) => Err(HexError::NotAString(other.to_string())),
        }
    }
}
