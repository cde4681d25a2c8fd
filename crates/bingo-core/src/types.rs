//! Core types: field values, field schemas, keys and table schemas.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::document::Document;
use crate::error::{Error, Result};

/// A coerced field value.
///
/// The derived order is the comparator shared by every index: `Null` sorts
/// before any present value, integers compare numerically and text compares
/// lexicographically. A single field never mixes `Integer` and `Text`.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Integer(i64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// `None` for `Null`, the value otherwise.
    pub fn present(&self) -> Option<&Value> {
        (!self.is_null()).then_some(self)
    }

    pub fn to_json(&self) -> Json {
        match self {
            Value::Null => Json::Null,
            Value::Integer(n) => Json::from(*n),
            Value::Text(s) => Json::String(s.clone()),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Text(s) => write!(f, "{s}"),
        }
    }
}

/// The declared logical type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::String => write!(f, "string"),
            FieldType::Integer => write!(f, "integer"),
        }
    }
}

impl FromStr for FieldType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "string" => Ok(FieldType::String),
            "integer" => Ok(FieldType::Integer),
            other => Err(other.to_string()),
        }
    }
}

/// A named, typed field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSchema {
    pub name: String,
    pub field_type: FieldType,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::String)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Integer)
    }

    /// Coerce a loosely-typed input into this field's canonical value.
    ///
    /// `null` is always accepted. A non-empty array is unwrapped to its first
    /// element, which covers scalars that arrive array-wrapped from query
    /// string parsing.
    pub fn parse(&self, raw: &Json) -> Result<Value> {
        if let Json::Array(items) = raw {
            return match items.first() {
                Some(first) => self.parse(first),
                None => Err(self.parse_error(raw)),
            };
        }
        if raw.is_null() {
            return Ok(Value::Null);
        }

        match self.field_type {
            FieldType::Integer => match raw {
                Json::Number(n) => {
                    if let Some(v) = n.as_i64() {
                        Ok(Value::Integer(v))
                    } else if n.is_f64() {
                        // Truncates toward zero; out-of-range floats saturate.
                        n.as_f64()
                            .map(|f| Value::Integer(f as i64))
                            .ok_or_else(|| self.parse_error(raw))
                    } else {
                        Err(self.parse_error(raw))
                    }
                }
                Json::String(s) => s
                    .parse::<i64>()
                    .map(Value::Integer)
                    .map_err(|_| self.parse_error(raw)),
                _ => Err(self.parse_error(raw)),
            },
            FieldType::String => match raw {
                Json::String(s) if !s.is_empty() => Ok(Value::Text(s.clone())),
                _ => Err(self.parse_error(raw)),
            },
        }
    }

    /// Coerce a key argument. An empty string is an absent key; any other
    /// input parses as in [`parse`](Self::parse).
    pub fn parse_key(&self, raw: &Json) -> Result<Value> {
        let inner = match raw {
            Json::Array(items) => items.first(),
            other => Some(other),
        };
        match inner {
            Some(Json::String(s)) if s.is_empty() => Ok(Value::Null),
            _ => self.parse(raw),
        }
    }

    /// Like [`parse`](Self::parse), but maps failures to `Null`.
    ///
    /// Used for scan cursors, where an unparsable bound means "no bound".
    pub fn parse_lenient(&self, raw: &Json) -> Value {
        self.parse(raw).unwrap_or(Value::Null)
    }

    fn parse_error(&self, raw: &Json) -> Error {
        Error::FieldParse {
            field: self.name.clone(),
            declared_type: self.field_type,
            raw: raw.clone(),
        }
    }
}

/// A (hash, sort) key pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    pub hash_field: FieldSchema,
    pub sort_field: Option<FieldSchema>,
}

impl Key {
    pub fn new(hash_field: FieldSchema, sort_field: Option<FieldSchema>) -> Self {
        Self {
            hash_field,
            sort_field,
        }
    }

    pub fn hash_of(&self, doc: &Document) -> Value {
        doc.get(&self.hash_field.name).clone()
    }

    pub fn sort_of(&self, doc: &Document) -> Value {
        self.sort_field
            .as_ref()
            .map(|f| doc.get(&f.name).clone())
            .unwrap_or(Value::Null)
    }

    /// Order two documents by hash then sort field; a missing document sorts
    /// before a present one.
    pub fn compare(&self, a: Option<&Document>, b: Option<&Document>) -> Ordering {
        match (a, b) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => self
                .hash_of(a)
                .cmp(&self.hash_of(b))
                .then_with(|| self.sort_of(a).cmp(&self.sort_of(b))),
        }
    }
}

/// A validated table schema.
///
/// Built once from configuration and shared read-only (behind an `Arc`) by the
/// table, its indices and every document stored in it.
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub name: String,
    pub fields: BTreeMap<String, FieldSchema>,
    pub primary_key: Key,
    pub sub_index_keys: BTreeMap<String, Key>,
    pub expire_field: Option<FieldSchema>,
    /// When set, `put` rejects documents without an expire value.
    pub expire_key_required: bool,
}

impl TableSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.get(name)
    }

    pub fn hash_field(&self) -> &FieldSchema {
        &self.primary_key.hash_field
    }

    pub fn sort_field(&self) -> Option<&FieldSchema> {
        self.primary_key.sort_field.as_ref()
    }
}
