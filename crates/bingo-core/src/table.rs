//! Tables: a primary index, its sub-indices and their expiry tracking, kept
//! in lock-step on every mutation.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use serde_json::{Map, Value as Json};
use tracing::trace;
use xxhash_rust::xxh64::Xxh64;

use crate::document::Document;
use crate::error::{Error, Result};
use crate::index::{IndexRef, PrimaryIndex, PutResult, ScanResult, SubIndex};
use crate::keeper::Keeper;
use crate::metrics::{Counters, SubIndexInfo, TableInfo};
use crate::types::{TableSchema, Value};

/// Number of identity lock stripes per table.
const LOCK_STRIPES: usize = 64;

/// A named collection of documents.
///
/// Reads go straight to the lock-free indices. Every mutation of a given
/// primary key (put, remove, expiry) holds that key's lock stripe while it
/// updates the primary index, every sub-index and the keeper, so concurrent
/// writers to one key are applied one after another and all structures agree
/// on the stored document.
pub struct Table {
    schema: Arc<TableSchema>,
    primary: PrimaryIndex,
    sub_indices: BTreeMap<String, SubIndex>,
    stripes: Box<[Mutex<()>]>,
    keeper: Arc<Keeper>,
    counters: Arc<Counters>,
}

impl Table {
    pub fn new(schema: Arc<TableSchema>, keeper: Arc<Keeper>, counters: Arc<Counters>) -> Self {
        let primary = PrimaryIndex::new(schema.primary_key.clone());
        let sub_indices = schema
            .sub_index_keys
            .iter()
            .map(|(name, key)| {
                let index = SubIndex::new(name.clone(), key.clone(), schema.primary_key.clone());
                (name.clone(), index)
            })
            .collect();
        let stripes = (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect();

        Self {
            schema,
            primary,
            sub_indices,
            stripes,
            keeper,
            counters,
        }
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn schema(&self) -> &Arc<TableSchema> {
        &self.schema
    }

    pub fn primary_index(&self) -> &PrimaryIndex {
        &self.primary
    }

    pub fn sub_index(&self, name: &str) -> Option<&SubIndex> {
        self.sub_indices.get(name)
    }

    /// Number of documents stored.
    pub fn size(&self) -> i64 {
        self.primary.size()
    }

    /// Resolve an index by name; the empty name is the primary index.
    pub fn index(&self, name: &str) -> Result<IndexRef<'_>> {
        if name.is_empty() {
            return Ok(IndexRef::Primary(&self.primary));
        }
        self.sub_indices
            .get(name)
            .map(IndexRef::Secondary)
            .ok_or_else(|| Error::IndexNotFound(name.to_string()))
    }

    fn lock(&self, hash: &Value, sort: &Value) -> MutexGuard<'_, ()> {
        let mut hasher = Xxh64::new(0);
        hash.hash(&mut hasher);
        sort.hash(&mut hasher);
        let slot = (hasher.finish() % self.stripes.len() as u64) as usize;
        self.stripes[slot].lock()
    }

    pub fn get(&self, index: &str, hash: &Json, sort: &Json) -> Result<Arc<Document>> {
        let index = self.index(index)?;
        self.counters.record_get();
        index.get(hash, sort)
    }

    /// Read up to `limit` documents from `since` (inclusive) in index order,
    /// or in reverse order when `backward` is set.
    pub fn scan(
        &self,
        index: &str,
        hash: &Json,
        since: Option<&Json>,
        limit: usize,
        backward: bool,
    ) -> Result<ScanResult> {
        let index = self.index(index)?;
        self.counters.record_scan();
        index.scan(hash, since, limit, backward)
    }

    /// Upsert a document.
    ///
    /// On first insert the stored document is `setOnInsert` overlaid with
    /// `set`. When a document already exists only `set` is applied on top of
    /// it. Coercion and key checks happen before anything is written.
    pub fn put(&self, set: Option<&Map<String, Json>>, set_on_insert: Option<&Map<String, Json>>) -> Result<PutResult> {
        let set = self.parse_patch(set)?;
        let set_on_insert = self.parse_patch(set_on_insert)?;

        let merged = match (set_on_insert, &set) {
            (None, None) => return Err(Error::SetOrInsertMissing),
            (Some(base), patch) => base.merge_opt(patch.as_ref()),
            (None, Some(set)) => set.clone(),
        };

        let key = &self.schema.primary_key;
        let hash = key.hash_of(&merged);
        if hash.is_null() {
            return Err(Error::HashKeyMissing);
        }
        let sort = key.sort_of(&merged);
        if key.sort_field.is_some() && sort.is_null() {
            return Err(Error::SortKeyMissing);
        }
        if self.schema.expire_key_required && merged.expires_at().is_none() {
            return Err(Error::ExpireKeyMissing);
        }

        let result = {
            let _guard = self.lock(&hash, &sort);

            let result = self
                .primary
                .put(Arc::new(merged), Some(|old: &Document| old.merge_opt(set.as_ref())));

            for sub in self.sub_indices.values() {
                if let Some(old) = &result.old {
                    sub.remove(old);
                }
                sub.put(Arc::clone(&result.new));
            }

            if let Some(old) = &result.old {
                self.keeper.untrack(old);
            }
            self.keeper.track(&result.new);

            result
        };

        self.counters.record_put();
        trace!(table = %self.schema.name, %hash, %sort, replaced = result.replaced, "put");
        Ok(result)
    }

    fn parse_patch(&self, patch: Option<&Map<String, Json>>) -> Result<Option<Document>> {
        match patch {
            Some(patch) => Document::parse(patch, &self.schema),
            None => Ok(None),
        }
    }

    /// Remove the document stored under (hash, sort).
    pub fn remove(&self, hash: &Json, sort: &Json) -> Result<Arc<Document>> {
        let hash = self.primary.parse_hash(hash)?;
        let sort = self.primary.parse_sort(sort)?;
        self.remove_key(&hash, &sort)
    }

    /// Remove the document stored under `doc`'s own primary key.
    pub fn remove_by_document(&self, doc: &Document) -> Result<Arc<Document>> {
        let key = &self.schema.primary_key;
        self.remove_key(&key.hash_of(doc), &key.sort_of(doc))
    }

    fn remove_key(&self, hash: &Value, sort: &Value) -> Result<Arc<Document>> {
        let removed = {
            let _guard = self.lock(hash, sort);
            let removed = self.primary.remove(hash, sort).ok_or(Error::DocumentNotFound)?;
            self.unlink(&removed);
            removed
        };

        self.counters.record_remove();
        trace!(table = %self.schema.name, %hash, %sort, "remove");
        Ok(removed)
    }

    /// Remove `doc` if it is still the stored version for its key.
    ///
    /// The keeper calls this for entries it found expired. A document that has
    /// since been replaced or removed is left alone and reported as
    /// [`Error::DocumentNotFound`].
    pub fn expire(&self, doc: &Arc<Document>) -> Result<Arc<Document>> {
        let key = &self.schema.primary_key;
        let hash = key.hash_of(doc);
        let sort = key.sort_of(doc);

        let _guard = self.lock(&hash, &sort);
        match self.primary.get_by_key(&hash, &sort) {
            Some(current) if Arc::ptr_eq(&current, doc) => {}
            _ => return Err(Error::DocumentNotFound),
        }
        let removed = self.primary.remove(&hash, &sort).ok_or(Error::DocumentNotFound)?;
        self.unlink(&removed);
        Ok(removed)
    }

    /// Drop a document just removed from the primary index from every
    /// sub-index and the keeper. Caller holds the key's stripe.
    fn unlink(&self, removed: &Arc<Document>) {
        for sub in self.sub_indices.values() {
            sub.remove(removed);
        }
        self.keeper.untrack(removed);
    }

    pub fn info(&self) -> TableInfo {
        TableInfo {
            name: self.schema.name.clone(),
            size: self.size(),
            sub_indices: self
                .sub_indices
                .values()
                .map(|sub| SubIndexInfo {
                    name: sub.name().to_string(),
                    size: sub.size(),
                })
                .collect(),
            expire_key_required: self.schema.expire_key_required,
        }
    }
}
