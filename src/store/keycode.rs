//! Order-preserving encoding for index keys and primary keys.
//!
//! Encoded keys compare with `memcmp` (SQLite's BLOB ordering) in the same
//! order as the key tuples they encode: integers sort before strings, and
//! tuples compare component by component.

use std::cmp::Ordering;
use std::fmt;

use crate::app::{BrookError, Result};

// Type prefixes. Cross-type ordering follows these values.
const TYPE_INTEGER: u8 = 0x02;
const TYPE_STRING: u8 = 0x04;

// Strings are terminated by 0x00 0x01; embedded zero bytes become 0x00 0xFF.
const STRING_ESCAPE: u8 = 0x00;
const STRING_ESCAPED_ZERO: u8 = 0xFF;
const STRING_TERMINATOR: u8 = 0x01;

/// Appended to a prefix to get an inclusive upper bound covering every key
/// that starts with it. No type prefix can reach this value.
pub const PREFIX_END: u8 = 0xFF;

/// One component of a key tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPart {
    Int(i64),
    Str(String),
}

impl KeyPart {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            KeyPart::Int(i) => Some(*i),
            KeyPart::Str(_) => None,
        }
    }

    /// Convert a JSON value into an indexable key part. Booleans, nulls,
    /// floats and objects are not indexable.
    pub fn from_json(value: &serde_json::Value) -> Option<KeyPart> {
        match value {
            serde_json::Value::Number(n) => n.as_i64().map(KeyPart::Int),
            serde_json::Value::String(s) => Some(KeyPart::Str(s.clone())),
            _ => None,
        }
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            KeyPart::Int(i) => {
                // Flip the sign bit so negative numbers sort first
                let unsigned = (*i as u64) ^ (1u64 << 63);
                out.push(TYPE_INTEGER);
                out.extend_from_slice(&unsigned.to_be_bytes());
            }
            KeyPart::Str(s) => {
                out.push(TYPE_STRING);
                for &b in s.as_bytes() {
                    if b == STRING_ESCAPE {
                        out.push(STRING_ESCAPE);
                        out.push(STRING_ESCAPED_ZERO);
                    } else {
                        out.push(b);
                    }
                }
                out.push(STRING_ESCAPE);
                out.push(STRING_TERMINATOR);
            }
        }
    }
}

impl From<i64> for KeyPart {
    fn from(i: i64) -> Self {
        KeyPart::Int(i)
    }
}

impl From<&str> for KeyPart {
    fn from(s: &str) -> Self {
        KeyPart::Str(s.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(s: String) -> Self {
        KeyPart::Str(s)
    }
}

impl PartialOrd for KeyPart {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KeyPart {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (KeyPart::Int(a), KeyPart::Int(b)) => a.cmp(b),
            (KeyPart::Str(a), KeyPart::Str(b)) => a.as_bytes().cmp(b.as_bytes()),
            (KeyPart::Int(_), KeyPart::Str(_)) => Ordering::Less,
            (KeyPart::Str(_), KeyPart::Int(_)) => Ordering::Greater,
        }
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Int(i) => write!(f, "{}", i),
            KeyPart::Str(s) => write!(f, "{:?}", s),
        }
    }
}

/// Encode a key tuple.
pub fn encode(parts: &[KeyPart]) -> Vec<u8> {
    let mut out = Vec::with_capacity(parts.len() * 10);
    for part in parts {
        part.encode_into(&mut out);
    }
    out
}

/// Encode a single-component key.
pub fn encode_one(part: impl Into<KeyPart>) -> Vec<u8> {
    encode(&[part.into()])
}

/// Decode a key tuple produced by [`encode`].
pub fn decode(mut bytes: &[u8]) -> Result<Vec<KeyPart>> {
    let mut parts = Vec::new();

    while let Some((&tag, rest)) = bytes.split_first() {
        match tag {
            TYPE_INTEGER => {
                if rest.len() < 8 {
                    return Err(BrookError::Other("truncated integer key".into()));
                }
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&rest[..8]);
                let signed = (u64::from_be_bytes(buf) ^ (1u64 << 63)) as i64;
                parts.push(KeyPart::Int(signed));
                bytes = &rest[8..];
            }
            TYPE_STRING => {
                let mut raw = Vec::new();
                let mut i = 0;
                loop {
                    match (rest.get(i), rest.get(i + 1)) {
                        (Some(&STRING_ESCAPE), Some(&STRING_TERMINATOR)) => break,
                        (Some(&STRING_ESCAPE), Some(&STRING_ESCAPED_ZERO)) => {
                            raw.push(0);
                            i += 2;
                        }
                        (Some(&b), _) if b != STRING_ESCAPE => {
                            raw.push(b);
                            i += 1;
                        }
                        _ => return Err(BrookError::Other("unterminated string key".into())),
                    }
                }
                let s = String::from_utf8(raw)
                    .map_err(|e| BrookError::Other(format!("invalid string key: {}", e)))?;
                parts.push(KeyPart::Str(s));
                bytes = &rest[i + 2..];
            }
            other => {
                return Err(BrookError::Other(format!(
                    "unknown key type prefix 0x{:02x}",
                    other
                )))
            }
        }
    }

    Ok(parts)
}

/// Inclusive upper bound for every key starting with `prefix`.
pub fn prefix_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    end.push(PREFIX_END);
    end
}
