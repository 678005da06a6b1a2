//! Decoder for the `meta` field.
//!
//! Upstream has shipped `meta` as a plain mapping, as an ordered list of
//! `{key, value}` pairs, and as a list of sub-events that each carry their own
//! `meta`. [`Meta::classify`] picks the variant once and [`Meta::flatten`]
//! resolves any of them into a single [`MetaMap`] before field extraction.

use std::collections::HashMap;

use serde_json::{Map, Value};

/// Flat key/value view over alert metadata.
pub type MetaMap = HashMap<String, String>;

/// Sub-events nested deeper than this are ignored.
const MAX_DEPTH: usize = 4;

/// The observed encodings of `meta`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Meta<'a> {
    /// `{"severity": "high", ...}`
    Mapping(&'a Map<String, Value>),
    /// `[{"key": "severity", "value": "high"}, ...]`
    Pairs(&'a [Value]),
    /// `[{"meta": ...}, ...]`; only the first sub-event carrying `meta` is used.
    SubEvents(&'a [Value]),
    Absent,
}

impl<'a> Meta<'a> {
    pub fn classify(value: Option<&'a Value>) -> Self {
        match value {
            Some(Value::Object(map)) => Meta::Mapping(map),
            Some(Value::Array(items)) if items.iter().any(is_pair) => Meta::Pairs(items),
            Some(Value::Array(items)) if items.iter().any(has_meta) => Meta::SubEvents(items),
            _ => Meta::Absent,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Meta::Absent)
    }

    pub fn flatten(&self) -> MetaMap {
        self.flatten_at(0)
    }

    fn flatten_at(&self, depth: usize) -> MetaMap {
        match *self {
            Meta::Mapping(map) => map
                .iter()
                .filter_map(|(k, v)| scalar_text(v).map(|s| (k.clone(), s)))
                .collect(),
            Meta::Pairs(items) => {
                let mut out = MetaMap::new();
                // Later pairs overwrite earlier ones. A later pair without a
                // scalar value clears the key instead of keeping a stale one.
                for item in items {
                    let Some(key) = item.get("key").and_then(Value::as_str) else {
                        continue;
                    };
                    match item.get("value").and_then(scalar_text) {
                        Some(value) => {
                            out.insert(key.to_string(), value);
                        }
                        None => {
                            out.remove(key);
                        }
                    }
                }
                out
            }
            Meta::SubEvents(items) => {
                if depth >= MAX_DEPTH {
                    return MetaMap::new();
                }
                items
                    .iter()
                    .find(|item| has_meta(item))
                    .map(|first| Meta::classify(first.get("meta")).flatten_at(depth + 1))
                    .unwrap_or_default()
            }
            Meta::Absent => MetaMap::new(),
        }
    }
}

fn is_pair(item: &Value) -> bool {
    item.get("key").is_some_and(Value::is_string)
}

fn has_meta(item: &Value) -> bool {
    item.get("meta").is_some()
}

/// Render a scalar JSON value as text. Nulls, arrays and objects yield `None`.
pub(crate) fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
