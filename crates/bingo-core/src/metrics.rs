//! Operation counters and table size snapshots.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Process-wide operation counters, shared by every table and the keeper.
#[derive(Debug, Default)]
pub struct Counters {
    get: AtomicU64,
    put: AtomicU64,
    remove: AtomicU64,
    scan: AtomicU64,
    expire: AtomicU64,
}

/// Counter values read by [`Counters::take`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub get: u64,
    pub put: u64,
    pub remove: u64,
    pub scan: u64,
    pub expire: u64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_get(&self) {
        self.get.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_put(&self) {
        self.put.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_remove(&self) {
        self.remove.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_scan(&self) {
        self.scan.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_expire(&self, n: u64) {
        self.expire.fetch_add(n, Ordering::Relaxed);
    }

    /// Current values, without resetting.
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            get: self.get.load(Ordering::Relaxed),
            put: self.put.load(Ordering::Relaxed),
            remove: self.remove.load(Ordering::Relaxed),
            scan: self.scan.load(Ordering::Relaxed),
            expire: self.expire.load(Ordering::Relaxed),
        }
    }

    /// Read every counter and reset it to zero.
    ///
    /// Each counter is swapped individually, so an increment racing with
    /// `take` lands in exactly one snapshot.
    pub fn take(&self) -> CounterSnapshot {
        CounterSnapshot {
            get: self.get.swap(0, Ordering::Relaxed),
            put: self.put.swap(0, Ordering::Relaxed),
            remove: self.remove.swap(0, Ordering::Relaxed),
            scan: self.scan.swap(0, Ordering::Relaxed),
            expire: self.expire.swap(0, Ordering::Relaxed),
        }
    }
}

/// Diagnostic summary of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableInfo {
    pub name: String,
    pub size: i64,
    /// Entry count per sub-index, by index name.
    pub sub_indices: Vec<SubIndexInfo>,
    pub expire_key_required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubIndexInfo {
    pub name: String,
    pub size: i64,
}
