//! Ordered multi-map indices: hash value to an ordered bucket of documents.
//!
//! Every index maps a hash value to a bucket, a lock-free `SkipMap` ordered by
//! the index's sort key. Buckets are created on first insert and never
//! removed, so a reader that already holds a bucket never races its deletion.
//!
//! Readers (`get`, `scan`, `rscan`) take no locks. Writers to the same
//! (hash, sort) identity must be serialized by the caller; [`Table`] does this
//! with a striped lock that also covers the sub-indices and the keeper.
//!
//! [`Table`]: crate::table::Table

pub mod primary;
pub mod sub;

use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use crossbeam_skiplist::SkipMap;
use crossbeam_skiplist::map::Entry;
use dashmap::DashMap;
use serde::ser::{Serialize, Serializer};
use serde_json::Value as Json;

use crate::document::Document;
use crate::error::Result;
use crate::types::{FieldSchema, Value};

pub use primary::PrimaryIndex;
pub use sub::{SubIndex, SubSortKey};

/// An ordered bucket of documents sharing one hash value.
pub type Bucket<K> = SkipMap<K, Arc<Document>>;

/// One page of a bounded scan.
#[derive(Debug, Clone)]
pub struct ScanPage<K> {
    pub values: Vec<Arc<Document>>,
    /// Sort key of the first entry past this page, if any.
    pub next: Option<K>,
}

/// Outcome of a put into an index.
#[derive(Debug, Clone)]
pub struct PutResult {
    pub old: Option<Arc<Document>>,
    pub new: Arc<Document>,
    pub replaced: bool,
}

/// Generic hash → ordered bucket index.
pub struct Index<K> {
    buckets: DashMap<Value, Arc<Bucket<K>>>,
    size: AtomicI64,
}

impl<K> Index<K>
where
    K: Ord + Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
            size: AtomicI64::new(0),
        }
    }

    /// Number of stored entries across all buckets.
    pub fn size(&self) -> i64 {
        self.size.load(Ordering::Relaxed)
    }

    /// Number of buckets ever created.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn bucket(&self, hash: &Value) -> Option<Arc<Bucket<K>>> {
        self.buckets.get(hash).map(|b| Arc::clone(b.value()))
    }

    /// Returns the bucket for `hash`, creating it if absent. Concurrent first
    /// inserts agree on a single bucket.
    fn bucket_or_create(&self, hash: &Value) -> Arc<Bucket<K>> {
        if let Some(bucket) = self.bucket(hash) {
            return bucket;
        }
        let entry = self
            .buckets
            .entry(hash.clone())
            .or_insert_with(|| Arc::new(SkipMap::new()));
        Arc::clone(entry.value())
    }

    pub fn get(&self, hash: &Value, sort: &K) -> Option<Arc<Document>> {
        let bucket = self.bucket(hash)?;
        bucket.get(sort).map(|entry| Arc::clone(entry.value()))
    }

    /// Smallest entry whose key is `>= sort`.
    pub fn ceiling(&self, hash: &Value, sort: &K) -> Option<(K, Arc<Document>)> {
        let bucket = self.bucket(hash)?;
        bucket
            .lower_bound(Bound::Included(sort))
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
    }

    /// Ascending page starting at `since` (inclusive), or at the smallest key.
    pub fn scan(&self, hash: &Value, since: Option<&K>, limit: usize) -> ScanPage<K> {
        let Some(bucket) = self.bucket(hash) else {
            return ScanPage::empty();
        };
        match since {
            Some(since) => collect_page(
                bucket.range::<K, _>((Bound::Included(since.clone()), Bound::Unbounded)),
                limit,
            ),
            None => collect_page(bucket.iter(), limit),
        }
    }

    /// Descending page starting at `since` (inclusive), or at the largest key.
    pub fn rscan(&self, hash: &Value, since: Option<&K>, limit: usize) -> ScanPage<K> {
        let Some(bucket) = self.bucket(hash) else {
            return ScanPage::empty();
        };
        match since {
            Some(since) => collect_page(
                bucket
                    .range::<K, _>((Bound::Unbounded, Bound::Included(since.clone())))
                    .rev(),
                limit,
            ),
            None => collect_page(bucket.iter().rev(), limit),
        }
    }

    /// Insert `doc` at (hash, sort).
    ///
    /// If an entry already exists, `on_conflict` receives it and returns the
    /// value to store; without a callback the new document replaces it.
    /// The size counter only grows on non-replacing inserts.
    pub fn put<F>(&self, hash: &Value, sort: K, doc: Arc<Document>, on_conflict: Option<F>) -> PutResult
    where
        F: FnOnce(&Document) -> Document,
    {
        let bucket = self.bucket_or_create(hash);

        let old = bucket.get(&sort).map(|entry| Arc::clone(entry.value()));
        match old {
            Some(old) => {
                let new = match on_conflict {
                    Some(merge) => Arc::new(merge(&old)),
                    None => doc,
                };
                bucket.insert(sort, Arc::clone(&new));
                PutResult {
                    old: Some(old),
                    new,
                    replaced: true,
                }
            }
            None => {
                bucket.insert(sort, Arc::clone(&doc));
                self.size.fetch_add(1, Ordering::Relaxed);
                PutResult {
                    old: None,
                    new: doc,
                    replaced: false,
                }
            }
        }
    }

    pub fn remove(&self, hash: &Value, sort: &K) -> Option<Arc<Document>> {
        let bucket = self.bucket(hash)?;
        let entry = bucket.remove(sort)?;
        self.size.fetch_sub(1, Ordering::Relaxed);
        Some(Arc::clone(entry.value()))
    }
}

impl<K> Default for Index<K>
where
    K: Ord + Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> ScanPage<K> {
    fn empty() -> Self {
        Self {
            values: Vec::new(),
            next: None,
        }
    }

    pub fn map_next<T>(self, f: impl FnOnce(K) -> T) -> ScanPage<T> {
        ScanPage {
            values: self.values,
            next: self.next.map(f),
        }
    }
}

fn collect_page<'a, K, I>(entries: I, limit: usize) -> ScanPage<K>
where
    K: Clone + 'a,
    I: Iterator<Item = Entry<'a, K, Arc<Document>>>,
{
    let mut values = Vec::with_capacity(limit.min(128));
    for entry in entries {
        if values.len() >= limit {
            return ScanPage {
                values,
                next: Some(entry.key().clone()),
            };
        }
        values.push(Arc::clone(entry.value()));
    }
    ScanPage { values, next: None }
}

/// Resume point returned by a scan.
///
/// Primary-index cursors are the scalar sort value; sub-index cursors are the
/// full `(secondarySort, primaryHash, primarySort)` triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cursor {
    Sort(Value),
    Sub(SubSortKey),
}

impl Cursor {
    pub fn to_json(&self) -> Json {
        match self {
            Cursor::Sort(v) => v.to_json(),
            Cursor::Sub(key) => key.to_json(),
        }
    }
}

impl Serialize for Cursor {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Cursor::Sort(v) => v.serialize(serializer),
            Cursor::Sub(key) => key.serialize(serializer),
        }
    }
}

/// Result of a table-level scan: documents plus the cursor for the next page.
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub values: Vec<Arc<Document>>,
    pub next: Option<Cursor>,
}

/// A primary or secondary index of a table, dispatched explicitly.
#[derive(Clone, Copy)]
pub enum IndexRef<'a> {
    Primary(&'a PrimaryIndex),
    Secondary(&'a SubIndex),
}

impl<'a> IndexRef<'a> {
    pub fn hash_field(&self) -> &'a FieldSchema {
        match *self {
            IndexRef::Primary(index) => &index.key().hash_field,
            IndexRef::Secondary(index) => &index.key().hash_field,
        }
    }

    pub fn sort_field(&self) -> Option<&'a FieldSchema> {
        match *self {
            IndexRef::Primary(index) => index.key().sort_field.as_ref(),
            IndexRef::Secondary(index) => index.key().sort_field.as_ref(),
        }
    }

    pub fn size(&self) -> i64 {
        match *self {
            IndexRef::Primary(index) => index.size(),
            IndexRef::Secondary(index) => index.size(),
        }
    }

    pub fn get(&self, hash: &Json, sort: &Json) -> Result<Arc<Document>> {
        match *self {
            IndexRef::Primary(index) => index.get(hash, sort),
            IndexRef::Secondary(index) => index.get(hash, sort),
        }
    }

    pub fn scan(&self, hash: &Json, since: Option<&Json>, limit: usize, backward: bool) -> Result<ScanResult> {
        match *self {
            IndexRef::Primary(index) => {
                let page = if backward {
                    index.rscan(hash, since, limit)?
                } else {
                    index.scan(hash, since, limit)?
                };
                let page = page.map_next(Cursor::Sort);
                Ok(ScanResult {
                    values: page.values,
                    next: page.next,
                })
            }
            IndexRef::Secondary(index) => {
                let page = if backward {
                    index.rscan(hash, since, limit)?
                } else {
                    index.scan(hash, since, limit)?
                };
                let page = page.map_next(Cursor::Sub);
                Ok(ScanResult {
                    values: page.values,
                    next: page.next,
                })
            }
        }
    }
}
