//! Dynamic keys and key paths for engine tables.
//!
//! Keys are stored in RocksDB column families as raw bytes, so the encoding
//! must preserve ordering and must be prefix-safe: an index scan for document
//! `"doc1"` uses the encoded key as an iterator prefix and must never match
//! entries for `"doc10"`. Text keys are therefore NUL-terminated, with
//! embedded NUL bytes escaped as `0x00 0xFF`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::EngineError;

const TAG_INT: u8 = 0x01;
const TAG_TEXT: u8 = 0x02;
const TAG_ARRAY: u8 = 0x03;

/// A primary or index key.
///
/// Mirrors the key types the persisted rows actually use: document
/// identifiers are text, change-log positions are integers. Arrays exist for
/// composite key paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    /// Monotonic integer key (change-log order).
    Int(u64),
    /// Text key (document identifiers).
    Text(String),
    /// Composite key.
    Array(Vec<Key>),
}

impl Key {
    /// Convenience constructor for text keys.
    pub fn text(s: impl Into<String>) -> Self {
        Key::Text(s.into())
    }

    /// Build a key from a JSON value, if the value has a key-compatible type.
    pub fn from_value(value: &Value) -> Option<Key> {
        match value {
            Value::Number(n) => n.as_u64().map(Key::Int),
            Value::String(s) => Some(Key::Text(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(Key::from_value)
                .collect::<Option<Vec<_>>>()
                .map(Key::Array),
            _ => None,
        }
    }

    /// Convert back into the JSON representation stored in rows.
    pub fn to_value(&self) -> Value {
        match self {
            Key::Int(n) => Value::from(*n),
            Key::Text(s) => Value::from(s.clone()),
            Key::Array(items) => Value::Array(items.iter().map(Key::to_value).collect()),
        }
    }

    /// Encode into order-preserving, prefix-safe bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16);
        self.encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Key::Int(n) => {
                out.push(TAG_INT);
                out.extend_from_slice(&n.to_be_bytes());
            }
            Key::Text(s) => {
                out.push(TAG_TEXT);
                for &b in s.as_bytes() {
                    if b == 0x00 {
                        out.push(0x00);
                        out.push(0xFF);
                    } else {
                        out.push(b);
                    }
                }
                out.push(0x00);
            }
            Key::Array(items) => {
                out.push(TAG_ARRAY);
                out.extend_from_slice(&(items.len() as u32).to_be_bytes());
                for item in items {
                    item.encode_into(out);
                }
            }
        }
    }

    /// Decode a key from the start of `bytes`, returning the remainder.
    ///
    /// Index-entry keys are `encoded(index key) ++ encoded(primary key)`;
    /// the remainder is how the primary key is recovered from the suffix.
    pub fn decode_from(bytes: &[u8]) -> Result<(Key, &[u8]), EngineError> {
        let (&tag, rest) = bytes
            .split_first()
            .ok_or_else(|| EngineError::Corrupt("empty key".into()))?;
        match tag {
            TAG_INT => {
                if rest.len() < 8 {
                    return Err(EngineError::Corrupt("truncated integer key".into()));
                }
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&rest[..8]);
                Ok((Key::Int(u64::from_be_bytes(buf)), &rest[8..]))
            }
            TAG_TEXT => {
                let mut text = Vec::new();
                let mut i = 0;
                loop {
                    match rest.get(i) {
                        Some(0x00) if rest.get(i + 1) == Some(&0xFF) => {
                            text.push(0x00);
                            i += 2;
                        }
                        Some(0x00) => {
                            i += 1;
                            break;
                        }
                        Some(&b) => {
                            text.push(b);
                            i += 1;
                        }
                        None => {
                            return Err(EngineError::Corrupt("unterminated text key".into()))
                        }
                    }
                }
                let text = String::from_utf8(text)
                    .map_err(|_| EngineError::Corrupt("non-UTF-8 text key".into()))?;
                Ok((Key::Text(text), &rest[i..]))
            }
            TAG_ARRAY => {
                if rest.len() < 4 {
                    return Err(EngineError::Corrupt("truncated array key".into()));
                }
                let mut buf = [0u8; 4];
                buf.copy_from_slice(&rest[..4]);
                let len = u32::from_be_bytes(buf) as usize;
                let mut items = Vec::with_capacity(len);
                let mut rest = &rest[4..];
                for _ in 0..len {
                    let (item, r) = Key::decode_from(rest)?;
                    items.push(item);
                    rest = r;
                }
                Ok((Key::Array(items), rest))
            }
            other => Err(EngineError::Corrupt(format!("unknown key tag {other:#04x}"))),
        }
    }

    /// Decode a key that occupies the whole of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Key, EngineError> {
        let (key, rest) = Key::decode_from(bytes)?;
        if !rest.is_empty() {
            return Err(EngineError::Corrupt("trailing bytes after key".into()));
        }
        Ok(key)
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Key::Int(n) => write!(f, "{n}"),
            Key::Text(s) => write!(f, "{s}"),
            Key::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Location of a key inside a row value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPath {
    /// A single field name.
    Single(String),
    /// A composite key built from several fields, in order.
    Composite(Vec<String>),
}

impl KeyPath {
    /// Extract the key from a row, if every referenced field carries
    /// a key-compatible value.
    pub fn extract(&self, row: &Value) -> Option<Key> {
        match self {
            KeyPath::Single(field) => Key::from_value(row.get(field)?),
            KeyPath::Composite(fields) => fields
                .iter()
                .map(|field| Key::from_value(row.get(field)?))
                .collect::<Option<Vec<_>>>()
                .map(Key::Array),
        }
    }

    /// Write a generated key back into the row.
    ///
    /// Only single-field paths can be auto-increment targets, matching the
    /// engine's table rules; composite paths are left untouched.
    pub fn inject(&self, row: &mut Value, key: &Key) {
        if let (KeyPath::Single(field), Value::Object(map)) = (self, row) {
            map.insert(field.clone(), key.to_value());
        }
    }
}

impl From<&str> for KeyPath {
    fn from(field: &str) -> Self {
        KeyPath::Single(field.to_string())
    }
}
