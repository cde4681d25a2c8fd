//! The primary index: one document per (hash, sort) identity.

use std::sync::Arc;

use serde_json::Value as Json;

use super::{Index, PutResult, ScanPage};
use crate::document::Document;
use crate::error::{Error, Result};
use crate::types::{Key, Value};

pub struct PrimaryIndex {
    key: Key,
    index: Index<Value>,
}

impl PrimaryIndex {
    pub fn new(key: Key) -> Self {
        Self {
            key,
            index: Index::new(),
        }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn size(&self) -> i64 {
        self.index.size()
    }

    /// Coerce a raw hash value; `Null` is rejected.
    pub fn parse_hash(&self, raw: &Json) -> Result<Value> {
        let hash = self.key.hash_field.parse_key(raw)?;
        if hash.is_null() {
            return Err(Error::HashKeyMissing);
        }
        Ok(hash)
    }

    /// Coerce a raw sort value. Tables without a sort field always use `Null`.
    pub fn parse_sort(&self, raw: &Json) -> Result<Value> {
        let Some(field) = &self.key.sort_field else {
            return Ok(Value::Null);
        };
        let sort = field.parse_key(raw)?;
        if sort.is_null() {
            return Err(Error::SortKeyMissing);
        }
        Ok(sort)
    }

    fn parse_since(&self, raw: Option<&Json>) -> Option<Value> {
        let field = self.key.sort_field.as_ref()?;
        let since = field.parse_lenient(raw?);
        (!since.is_null()).then_some(since)
    }

    pub fn get(&self, hash: &Json, sort: &Json) -> Result<Arc<Document>> {
        let hash = self.parse_hash(hash)?;
        let sort = self.parse_sort(sort)?;
        self.get_by_key(&hash, &sort).ok_or(Error::DocumentNotFound)
    }

    pub fn get_by_key(&self, hash: &Value, sort: &Value) -> Option<Arc<Document>> {
        self.index.get(hash, sort)
    }

    pub fn scan(&self, hash: &Json, since: Option<&Json>, limit: usize) -> Result<ScanPage<Value>> {
        let hash = self.parse_hash(hash)?;
        let since = self.parse_since(since);
        Ok(self.index.scan(&hash, since.as_ref(), limit))
    }

    pub fn rscan(&self, hash: &Json, since: Option<&Json>, limit: usize) -> Result<ScanPage<Value>> {
        let hash = self.parse_hash(hash)?;
        let since = self.parse_since(since);
        Ok(self.index.rscan(&hash, since.as_ref(), limit))
    }

    /// Store `doc` under its own primary key.
    ///
    /// The caller must hold the identity lock for the document's key so the
    /// read of an existing entry and the conflict merge happen atomically.
    pub fn put<F>(&self, doc: Arc<Document>, on_conflict: Option<F>) -> PutResult
    where
        F: FnOnce(&Document) -> Document,
    {
        let hash = self.key.hash_of(&doc);
        let sort = self.key.sort_of(&doc);
        self.index.put(&hash, sort, doc, on_conflict)
    }

    pub fn remove(&self, hash: &Value, sort: &Value) -> Option<Arc<Document>> {
        self.index.remove(hash, sort)
    }
}
