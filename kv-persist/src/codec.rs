//! # JSON Value Codec
//!
//! Keys and byte strings in the keyspace are binary-safe; JSON strings are
//! not. Every byte string crossing into the preamble or snapshot file is
//! base64-encoded on the way out and decoded on the way back, keeping the
//! on-disk format plain JSON rather than inventing a binary framing.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use kv_engine::zset::ZSet;
use kv_engine::Value;
use serde::{Deserialize, Serialize};

fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

fn decode(s: &str) -> Result<Bytes, base64::DecodeError> {
    STANDARD.decode(s).map(Bytes::from)
}

/// JSON-safe mirror of [`kv_engine::Value`], one variant per value kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PersistedValue {
    String(String),
    List(Vec<String>),
    Hash(Vec<(String, String)>),
    Set(Vec<String>),
    SortedSet(Vec<(String, f64)>),
}

impl PersistedValue {
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(b) => PersistedValue::String(encode(b)),
            Value::List(l) => PersistedValue::List(l.iter().map(|b| encode(b)).collect()),
            Value::Hash(h) => {
                PersistedValue::Hash(h.iter().map(|(f, v)| (encode(f), encode(v))).collect())
            }
            Value::Set(s) => PersistedValue::Set(s.iter().map(|m| encode(m)).collect()),
            Value::SortedSet(z) => {
                PersistedValue::SortedSet(z.iter().map(|(m, score)| (encode(m), *score)).collect())
            }
        }
    }

    pub fn into_value(self) -> Result<Value, base64::DecodeError> {
        Ok(match self {
            PersistedValue::String(s) => Value::String(decode(&s)?),
            PersistedValue::List(items) => {
                let mut list = Value::new_list();
                if let Value::List(deque) = &mut list {
                    for item in items {
                        deque.push_back(decode(&item)?);
                    }
                }
                list
            }
            PersistedValue::Hash(pairs) => {
                let mut hash = Value::new_hash();
                if let Value::Hash(map) = &mut hash {
                    for (field, value) in pairs {
                        map.insert(decode(&field)?, decode(&value)?);
                    }
                }
                hash
            }
            PersistedValue::Set(members) => {
                let mut set = Value::new_set();
                if let Value::Set(inner) = &mut set {
                    for member in members {
                        inner.insert(decode(&member)?);
                    }
                }
                set
            }
            PersistedValue::SortedSet(pairs) => {
                let mut members = Vec::with_capacity(pairs.len());
                for (member, score) in pairs {
                    members.push((decode(&member)?, score));
                }
                Value::SortedSet(ZSet::from_pairs(members))
            }
        })
    }
}

/// One key as stored in a preamble or snapshot file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedEntry {
    pub key: String,
    pub value: PersistedValue,
    #[serde(rename = "expireAt", skip_serializing_if = "Option::is_none")]
    pub expire_at: Option<i64>,
}

impl PersistedEntry {
    pub fn key_bytes(&self) -> Result<Bytes, base64::DecodeError> {
        decode(&self.key)
    }
}

pub fn encode_key(key: &[u8]) -> String {
    encode(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kv_engine::Value;

    #[test]
    fn string_round_trips_through_persisted_value() {
        let original = Value::String(Bytes::from_static(b"hello"));
        let persisted = PersistedValue::from_value(&original);
        let restored = persisted.into_value().unwrap();
        match restored {
            Value::String(b) => assert_eq!(b, Bytes::from_static(b"hello")),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn sorted_set_round_trips_scores() {
        let zset = ZSet::from_pairs(vec![(Bytes::from_static(b"a"), 1.0), (Bytes::from_static(b"b"), 2.5)]);
        let original = Value::SortedSet(zset);
        let persisted = PersistedValue::from_value(&original);
        let restored = persisted.into_value().unwrap();
        match restored {
            Value::SortedSet(z) => {
                assert_eq!(z.score(&Bytes::from_static(b"a")), Some(1.0));
                assert_eq!(z.score(&Bytes::from_static(b"b")), Some(2.5));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
