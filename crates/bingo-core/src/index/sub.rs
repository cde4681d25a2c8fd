//! Secondary indices ordered by a composite key.

use std::sync::Arc;

use serde::ser::{Serialize, SerializeTuple, Serializer};
use serde_json::Value as Json;

use super::{Index, ScanPage};
use crate::document::Document;
use crate::error::{Error, Result};
use crate::types::{FieldSchema, Key, Value};

/// Ordering key of a sub-index entry.
///
/// Many documents may share a secondary sort value; the owning document's
/// primary key breaks ties so every entry has a unique position.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SubSortKey {
    pub sort: Value,
    pub primary_hash: Value,
    pub primary_sort: Value,
}

impl SubSortKey {
    pub fn to_json(&self) -> Json {
        Json::Array(vec![
            self.sort.to_json(),
            self.primary_hash.to_json(),
            self.primary_sort.to_json(),
        ])
    }
}

impl Serialize for SubSortKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(3)?;
        tuple.serialize_element(&self.sort)?;
        tuple.serialize_element(&self.primary_hash)?;
        tuple.serialize_element(&self.primary_sort)?;
        tuple.end()
    }
}

/// A named secondary index over a table's documents.
///
/// Entries are references to documents owned by the primary index. Documents
/// without a value for the index's hash field are not indexed.
pub struct SubIndex {
    name: String,
    key: Key,
    primary_key: Key,
    index: Index<SubSortKey>,
}

impl SubIndex {
    pub fn new(name: impl Into<String>, key: Key, primary_key: Key) -> Self {
        Self {
            name: name.into(),
            key,
            primary_key,
            index: Index::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn size(&self) -> i64 {
        self.index.size()
    }

    pub fn sort_key_of(&self, doc: &Document) -> SubSortKey {
        SubSortKey {
            sort: self.key.sort_of(doc),
            primary_hash: self.primary_key.hash_of(doc),
            primary_sort: self.primary_key.sort_of(doc),
        }
    }

    fn parse_hash(&self, raw: &Json) -> Result<Value> {
        let hash = self.key.hash_field.parse_key(raw)?;
        if hash.is_null() {
            return Err(Error::HashKeyMissing);
        }
        Ok(hash)
    }

    /// Parse a sort argument.
    ///
    /// An array is read positionally as `[sort, primaryHash, primarySort]`;
    /// missing trailing components are `Null`. Anything else is the secondary
    /// sort value alone.
    pub fn parse_sort_key(&self, raw: &Json) -> Result<SubSortKey> {
        self.sort_key_with(raw, FieldSchema::parse_key)
    }

    /// Parse a scan cursor in the same shape as [`parse_sort_key`](Self::parse_sort_key).
    /// Each component is coerced on its own; one that fails to parse is `Null`.
    pub fn parse_cursor(&self, raw: &Json) -> SubSortKey {
        self.sort_key_with(raw, |field, raw| Ok(field.parse_lenient(raw)))
            .unwrap_or_default()
    }

    fn sort_key_with<F>(&self, raw: &Json, parse: F) -> Result<SubSortKey>
    where
        F: Fn(&FieldSchema, &Json) -> Result<Value>,
    {
        let component = |field: Option<&FieldSchema>, raw: Option<&Json>| -> Result<Value> {
            match (field, raw) {
                (Some(field), Some(raw)) => parse(field, raw),
                _ => Ok(Value::Null),
            }
        };

        match raw {
            Json::Array(items) => Ok(SubSortKey {
                sort: component(self.key.sort_field.as_ref(), items.first())?,
                primary_hash: component(Some(&self.primary_key.hash_field), items.get(1))?,
                primary_sort: component(self.primary_key.sort_field.as_ref(), items.get(2))?,
            }),
            scalar => Ok(SubSortKey {
                sort: component(self.key.sort_field.as_ref(), Some(scalar))?,
                ..SubSortKey::default()
            }),
        }
    }

    fn parse_since(&self, raw: Option<&Json>) -> Option<SubSortKey> {
        let since = self.parse_cursor(raw?);
        (since != SubSortKey::default()).then_some(since)
    }

    /// Ceiling lookup: the first entry at or after the requested key, accepted
    /// only when its secondary sort value matches exactly.
    pub fn get(&self, hash: &Json, sort: &Json) -> Result<Arc<Document>> {
        let hash = self.parse_hash(hash)?;
        let wanted = self.parse_sort_key(sort)?;
        if self.key.sort_field.is_some() && wanted.sort.is_null() {
            return Err(Error::SortKeyMissing);
        }

        match self.index.ceiling(&hash, &wanted) {
            Some((found, doc)) if found.sort == wanted.sort => Ok(doc),
            _ => Err(Error::DocumentNotFound),
        }
    }

    pub fn scan(&self, hash: &Json, since: Option<&Json>, limit: usize) -> Result<ScanPage<SubSortKey>> {
        let hash = self.parse_hash(hash)?;
        let since = self.parse_since(since);
        Ok(self.index.scan(&hash, since.as_ref(), limit))
    }

    pub fn rscan(&self, hash: &Json, since: Option<&Json>, limit: usize) -> Result<ScanPage<SubSortKey>> {
        let hash = self.parse_hash(hash)?;
        let since = self.parse_since(since);
        Ok(self.index.rscan(&hash, since.as_ref(), limit))
    }

    /// Index `doc`, replacing any entry at the same composite key.
    pub fn put(&self, doc: Arc<Document>) {
        let hash = self.key.hash_of(&doc);
        if hash.is_null() {
            return;
        }
        let sort = self.sort_key_of(&doc);
        self.index
            .put(&hash, sort, doc, None::<fn(&Document) -> Document>);
    }

    pub fn remove(&self, doc: &Document) -> Option<Arc<Document>> {
        let hash = self.key.hash_of(doc);
        if hash.is_null() {
            return None;
        }
        self.index.remove(&hash, &self.sort_key_of(doc))
    }

    /// The entry currently stored for `doc`'s composite key, if any.
    pub fn lookup(&self, doc: &Document) -> Option<Arc<Document>> {
        let hash = self.key.hash_of(doc);
        self.index.get(&hash, &self.sort_key_of(doc))
    }
}
