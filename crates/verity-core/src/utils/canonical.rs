//! Canonical JSON traversal.
//!
//! Two JSON values that differ only in object key order produce the same digest
//! and the same canonical bytes. Each JSON type is prefixed with a discriminant
//! byte so that, for example, `"1"` and `1` never collide:
//!
//! | Type   | Prefix | Followed by                          |
//! |--------|--------|--------------------------------------|
//! | null   | `0`    |                                      |
//! | bool   | `1`    | one byte                             |
//! | number | `2`    | canonical decimal text               |
//! | string | `3`    | length (u64 BE) + UTF-8 bytes        |
//! | array  | `4`    | length + each element                |
//! | object | `5`    | length + sorted `(key, value)` pairs |

use serde_json::Value;
use sha2::Digest;

/// Feeds a type-tagged, key-sorted traversal of `value` into `hasher`.
pub fn digest_json_value<D: Digest>(value: &Value, hasher: &mut D) {
    match value {
        Value::Null => hasher.update([0u8]),
        Value::Bool(b) => hasher.update([1u8, u8::from(*b)]),
        Value::Number(n) => {
            hasher.update([2u8]);
            hasher.update(n.to_string().as_bytes());
        }
        Value::String(s) => {
            hasher.update([3u8]);
            hasher.update((s.len() as u64).to_be_bytes());
            hasher.update(s.as_bytes());
        }
        Value::Array(items) => {
            hasher.update([4u8]);
            hasher.update((items.len() as u64).to_be_bytes());
            for item in items {
                digest_json_value(item, hasher);
            }
        }
        Value::Object(map) => {
            hasher.update([5u8]);
            hasher.update((map.len() as u64).to_be_bytes());
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            for key in keys {
                hasher.update((key.len() as u64).to_be_bytes());
                hasher.update(key.as_bytes());
                if let Some(v) = map.get(key) {
                    digest_json_value(v, hasher);
                }
            }
        }
    }
}

/// Serializes `value` as compact JSON with object keys sorted at every level.
#[must_use]
pub fn canonical_json(value: &Value) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out);
            }
            out.push(b']');
        }
        Value::Object(map) => {
            out.push(b'{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                out.extend_from_slice(Value::String(key.clone()).to_string().as_bytes());
                out.push(b':');
                if let Some(v) = map.get(key) {
                    write_canonical(v, out);
                }
            }
            out.push(b'}');
        }
        scalar => out.extend_from_slice(scalar.to_string().as_bytes()),
    }
}
