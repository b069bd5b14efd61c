use primitive_types::{H256, U256};
use serde_json::Value;
use thiserror::Error;

/// Errors from parsing wire hex values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HexError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),
    #[error("expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("quantity out of range: {0}")]
    Overflow(String),
    #[error("expected a hex string, got {0}")]
    NotAString(String),
}

/// Formats bytes as a `0x`-prefixed lowercase hex string.
#[must_use]
pub fn encode_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Formats a `u64` as a JSON-RPC quantity. Zero is `"0x0"`.
#[must_use]
pub fn format_quantity(value: u64) -> String {
    format!("0x{value:x}")
}

/// Parses a hex byte string with or without the `0x` prefix.
///
/// An odd number of digits is left-padded with a zero nibble.
///
/// # Errors
/// Returns [`HexError::InvalidHex`] for non-hex characters.
pub fn parse_bytes(s: &str) -> Result<Vec<u8>, HexError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.len() % 2 == 1 {
        hex::decode(format!("0{digits}")).map_err(|_| HexError::InvalidHex(s.to_string()))
    } else {
        hex::decode(digits).map_err(|_| HexError::InvalidHex(s.to_string()))
    }
}

/// Parses a 32-byte hash.
///
/// # Errors
/// Returns an error for invalid hex or a length other than 32.
pub fn parse_h256(s: &str) -> Result<H256, HexError> {
    let bytes = parse_bytes(s)?;
    if bytes.len() != 32 {
        return Err(HexError::InvalidLength { expected: 32, actual: bytes.len() });
    }
    Ok(H256::from_slice(&bytes))
}

/// Parses a JSON-RPC quantity (`"0x1a"`) into a `u64`.
///
/// # Errors
/// Returns an error for invalid hex or values wider than 64 bits.
pub fn parse_quantity(s: &str) -> Result<u64, HexError> {
    let digits = s.strip_prefix("0x").ok_or_else(|| HexError::InvalidHex(s.to_string()))?;
    if digits.is_empty() {
        return Err(HexError::InvalidHex(s.to_string()));
    }
    u64::from_str_radix(digits, 16).map_err(|_| {
        if digits.chars().all(|c| c.is_ascii_hexdigit()) {
            HexError::Overflow(s.to_string())
        } else {
            HexError::InvalidHex(s.to_string())
        }
    })
}

/// Parses a JSON-RPC quantity into a `U256`.
///
/// # Errors
/// Returns an error for invalid hex or values wider than 256 bits.
pub fn parse_u256(s: &str) -> Result<U256, HexError> {
    let digits = s.strip_prefix("0x").ok_or_else(|| HexError::InvalidHex(s.to_string()))?;
    if digits.is_empty() || digits.len() > 64 {
        return Err(HexError::Overflow(s.to_string()));
    }
    U256::from_str_radix(digits, 16).map_err(|_| HexError::InvalidHex(s.to_string()))
}

/// Reads a quantity from a JSON value that is either a hex string or a number.
///
/// # Errors
/// Returns an error when the value is neither.
pub fn value_to_u64(value: &Value) -> Result<u64, HexError> {
    match value {
        Value::String(s) => parse_quantity(s),
        Value::Number(n) => n.as_u64().ok_or_else(|| HexError::Overflow(n.to_string())),
        other => Err(HexError::NotAString(other.to_string())),
    }
}

/// Reads a `U256` from a JSON value that is either a hex string or a number.
///
/// # Errors
/// Returns an error when the value is neither.
pub fn value_to_u256(value: &Value) -> Result<U256, HexError> {
    match value {
        Value::String(s) => parse_u256(s),
        Value::Number(n) => {
            n.as_u64().map(U256::from).ok_or_else(|| HexError::Overflow(n.to_string()))
        }
        other => Err(HexError::NotAString(other.to_string())),
    }
}

/// Reads hex bytes from a JSON string value.
///
/// # Errors
/// Returns an error when the value is not a hex string.
pub fn value_to_bytes(value: &Value) -> Result<Vec<u8>, HexError> {
    value.as_str().ok_or_else(|| HexError::NotAString(value.to_string())).and_then(parse_bytes)
}
