//! Schema-tagged documents.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value as Json};
use tracing::trace;

use crate::error::{Error, Result};
use crate::types::{TableSchema, Value};

static NULL: Value = Value::Null;

/// An immutable record of coerced field values.
///
/// Documents are only produced by [`Document::parse`] (or by merging two
/// parsed documents), so every declared field already matches its type.
/// Fields the schema does not declare are carried as raw JSON in `extra`.
/// Stored documents are never mutated; an update replaces the stored
/// `Arc<Document>` with a freshly merged one.
#[derive(Debug, Clone)]
pub struct Document {
    values: BTreeMap<String, Value>,
    extra: Map<String, Json>,
    schema: Arc<TableSchema>,
}

impl Document {
    /// Coerce a JSON object against `schema`.
    ///
    /// Returns `Ok(None)` for an empty object so that an absent patch and an
    /// empty patch behave the same. Fields the schema does not declare are
    /// kept as given.
    pub fn parse(data: &Map<String, Json>, schema: &Arc<TableSchema>) -> Result<Option<Document>> {
        if data.is_empty() {
            return Ok(None);
        }

        let mut values = BTreeMap::new();
        let mut extra = Map::new();
        for (name, raw) in data {
            match schema.field(name) {
                Some(field) => {
                    values.insert(name.clone(), field.parse(raw)?);
                }
                None => {
                    trace!(table = %schema.name, field = %name, "keeping undeclared field");
                    extra.insert(name.clone(), raw.clone());
                }
            }
        }

        Ok(Some(Document {
            values,
            extra,
            schema: Arc::clone(schema),
        }))
    }

    /// Coerce a JSON value that must be an object.
    pub fn from_json(data: &Json, schema: &Arc<TableSchema>) -> Result<Option<Document>> {
        match data {
            Json::Object(map) => Self::parse(map, schema),
            Json::Null => Ok(None),
            other => Err(Error::NotAnObject(other.clone())),
        }
    }

    /// The value stored under `field`, or `Null` when absent.
    pub fn get(&self, field: &str) -> &Value {
        self.values.get(field).unwrap_or(&NULL)
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// Undeclared fields, uncoerced.
    pub fn extra(&self) -> &Map<String, Json> {
        &self.extra
    }

    pub fn schema(&self) -> &Arc<TableSchema> {
        &self.schema
    }

    /// Apply `patch` on top of this document and return the result.
    ///
    /// Every field present in `patch` overrides; every other field keeps its
    /// current value. Neither input is modified.
    ///
    /// # Panics
    ///
    /// Panics if the two documents were built from different schemas.
    pub fn merge(&self, patch: &Document) -> Document {
        assert!(
            Arc::ptr_eq(&self.schema, &patch.schema),
            "cannot merge documents of table '{}' and table '{}'",
            self.schema.name,
            patch.schema.name
        );

        let mut values = self.values.clone();
        for (name, value) in &patch.values {
            values.insert(name.clone(), value.clone());
        }
        let mut extra = self.extra.clone();
        for (name, raw) in &patch.extra {
            extra.insert(name.clone(), raw.clone());
        }

        Document {
            values,
            extra,
            schema: Arc::clone(&self.schema),
        }
    }

    /// Like [`merge`](Self::merge) with an optional patch; `None` is a no-op.
    pub fn merge_opt(&self, patch: Option<&Document>) -> Document {
        match patch {
            Some(patch) => self.merge(patch),
            None => self.clone(),
        }
    }

    /// The document's expiry (epoch millis), if the schema declares an expire
    /// field and the document carries a value for it.
    pub fn expires_at(&self) -> Option<i64> {
        let field = self.schema.expire_field.as_ref()?;
        self.get(&field.name).as_i64()
    }

    /// Flat JSON object of field name to value, undeclared fields included.
    pub fn to_json(&self) -> Json {
        let mut map = self.extra.clone();
        for (name, value) in &self.values {
            map.insert(name.clone(), value.to_json());
        }
        Json::Object(map)
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.schema, &other.schema)
            && self.values == other.values
            && self.extra == other.extra
    }
}

impl Eq for Document {}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len() + self.extra.len()))?;
        for (name, value) in &self.values {
            map.serialize_entry(name, value)?;
        }
        for (name, raw) in &self.extra {
            map.serialize_entry(name, raw)?;
        }
        map.end()
    }
}
