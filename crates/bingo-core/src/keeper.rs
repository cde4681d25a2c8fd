//! Cross-table TTL tracking and the periodic expiry sweep.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossbeam_skiplist::SkipMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::document::Document;
use crate::error::Error;
use crate::metrics::Counters;
use crate::table::Table;
use crate::types::Value;

/// Tables by name, as handed to the sweep task.
pub type TableMap = BTreeMap<String, Arc<Table>>;

/// Configuration for the background expiry sweep.
#[derive(Debug, Clone)]
pub struct KeeperConfig {
    /// Interval between sweeps (default: 1 second).
    pub sweep_interval: Duration,
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(1),
        }
    }
}

impl KeeperConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

/// Ordering key of a tracked document: expiry first, then owning table,
/// then the document's primary key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ExpireKey {
    pub expires_at: i64,
    pub table: String,
    pub hash: Value,
    pub sort: Value,
}

impl ExpireKey {
    /// `None` when the document carries no expiry.
    pub fn of(doc: &Document) -> Option<Self> {
        let expires_at = doc.expires_at()?;
        let schema = doc.schema();
        Some(Self {
            expires_at,
            table: schema.name.clone(),
            hash: schema.primary_key.hash_of(doc),
            sort: schema.primary_key.sort_of(doc),
        })
    }
}

struct SweepTask {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Expiry index shared by every table.
///
/// An entry exists exactly while its document is stored and has an expiry.
/// Tables maintain that under their per-key locks; the sweep only ever
/// removes documents through [`Table::expire`].
#[derive(Default)]
pub struct Keeper {
    entries: SkipMap<ExpireKey, Arc<Document>>,
    task: Mutex<Option<SweepTask>>,
}

impl Keeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn track(&self, doc: &Arc<Document>) {
        if let Some(key) = ExpireKey::of(doc) {
            self.entries.insert(key, Arc::clone(doc));
        }
    }

    pub fn untrack(&self, doc: &Document) {
        if let Some(key) = ExpireKey::of(doc) {
            self.entries.remove(&key);
        }
    }

    /// The document tracked under `doc`'s expire key.
    pub fn tracked(&self, doc: &Document) -> Option<Arc<Document>> {
        let key = ExpireKey::of(doc)?;
        self.entries.get(&key).map(|entry| Arc::clone(entry.value()))
    }

    /// Earliest tracked expiry.
    pub fn next_expiry(&self) -> Option<i64> {
        self.entries.front().map(|entry| entry.key().expires_at)
    }

    /// Expire every tracked document with `expires_at <= now_ms`.
    ///
    /// Returns the number of documents removed. Entries whose document was
    /// already removed or replaced are discarded without error.
    pub fn sweep<F>(&self, now_ms: i64, lookup: F) -> usize
    where
        F: Fn(&str) -> Option<Arc<Table>>,
    {
        let mut expired = 0;
        while let Some(entry) = self.entries.front() {
            if entry.key().expires_at > now_ms {
                break;
            }

            match lookup(&entry.key().table) {
                Some(table) => match table.expire(entry.value()) {
                    Ok(_) => expired += 1,
                    Err(Error::DocumentNotFound) => {}
                    Err(e) => warn!(table = %entry.key().table, error = %e, "expire failed"),
                },
                None => warn!(table = %entry.key().table, "dropping expiry entry of unknown table"),
            }

            // No-op when the table already untracked this exact node.
            entry.remove();
        }
        expired
    }

    /// Start the background sweep over `tables`.
    ///
    /// Does nothing if a sweep task is already running.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context.
    pub fn start(self: &Arc<Self>, tables: Arc<TableMap>, counters: Arc<Counters>, config: &KeeperConfig) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(Self::sweep_task(
            Arc::clone(self),
            tables,
            counters,
            config.sweep_interval,
            shutdown_rx,
        ));
        *task = Some(SweepTask {
            shutdown_tx,
            handle,
        });
        info!(interval_ms = config.sweep_interval.as_millis() as u64, "keeper started");
    }

    /// Signal the sweep task to exit. Idempotent.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            let _ = task.shutdown_tx.send(true);
            drop(task.handle);
            info!("keeper stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    async fn sweep_task(
        keeper: Arc<Keeper>,
        tables: Arc<TableMap>,
        counters: Arc<Counters>,
        interval: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let expired = keeper.sweep(now_millis(), |name| tables.get(name).cloned());
                    if expired > 0 {
                        counters.record_expire(expired as u64);
                        debug!(expired, "sweep finished");
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

impl Drop for Keeper {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            let _ = task.shutdown_tx.send(true);
        }
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::tests::onlines_schema;
    use crate::table::tests::obj;
    use serde_json::json;

    fn setup() -> (Arc<Keeper>, Arc<Counters>, Arc<TableMap>) {
        let keeper = Arc::new(Keeper::new());
        let counters = Arc::new(Counters::new());
        let table = Table::new(onlines_schema(), Arc::clone(&keeper), Arc::clone(&counters));
        let tables = Arc::new(TableMap::from([("onlines".to_string(), Arc::new(table))]));
        (keeper, counters, tables)
    }

    fn put(tables: &TableMap, person: &str, expires_at: i64) -> Arc<Document> {
        tables["onlines"]
            .put(
                Some(&obj(json!({
                    "channelId": "1",
                    "personKey": person,
                    "updatedAt": 1,
                    "expiresAt": expires_at,
                }))),
                None,
            )
            .unwrap()
            .new
    }

    #[test]
    fn test_config_builder() {
        assert_eq!(KeeperConfig::default().sweep_interval, Duration::from_secs(1));
        let config = KeeperConfig::new().with_sweep_interval(Duration::from_millis(20));
        assert_eq!(config.sweep_interval, Duration::from_millis(20));
    }

    #[test]
    fn test_expire_key_order() {
        let a = ExpireKey {
            expires_at: 10,
            table: "b".to_string(),
            hash: Value::from("1"),
            sort: Value::from("x"),
        };
        let b = ExpireKey {
            expires_at: 11,
            table: "a".to_string(),
            ..a.clone()
        };
        let c = ExpireKey {
            table: "c".to_string(),
            ..a.clone()
        };
        assert!(a < b);
        assert!(a < c);
    }

    #[test]
    fn test_untracked_without_expiry() {
        let (keeper, _, tables) = setup();
        tables["onlines"]
            .put(Some(&obj(json!({"channelId": "1", "personKey": "p"}))), None)
            .unwrap();
        assert!(keeper.is_empty());
        assert_eq!(keeper.next_expiry(), None);
    }

    #[test]
    fn test_sweep_removes_expired_document_everywhere() {
        let (keeper, _, tables) = setup();
        let now = now_millis();
        let doomed = put(&tables, "p1", now - 1);
        let kept = put(&tables, "p2", now + 60_000);
        assert_eq!(keeper.len(), 2);
        assert_eq!(keeper.next_expiry(), Some(now - 1));

        let expired = keeper.sweep(now, |name| tables.get(name).cloned());
        assert_eq!(expired, 1);

        let table = &tables["onlines"];
        assert!(matches!(
            table.get("", &json!("1"), &json!("p1")),
            Err(Error::DocumentNotFound)
        ));
        let guest = table.sub_index("guest").unwrap();
        assert!(guest.lookup(&doomed).is_none());
        assert!(keeper.tracked(&doomed).is_none());
        assert!(keeper.tracked(&kept).is_some());
        assert_eq!(keeper.len(), 1);
    }

    #[test]
    fn test_sweep_stops_at_first_future_entry() {
        let (keeper, _, tables) = setup();
        put(&tables, "p1", 100);
        put(&tables, "p2", 200);
        put(&tables, "p3", 300);

        assert_eq!(keeper.sweep(200, |name| tables.get(name).cloned()), 2);
        assert_eq!(keeper.next_expiry(), Some(300));
        assert_eq!(tables["onlines"].size(), 1);
    }

    #[test]
    fn test_sweep_ignores_already_removed() {
        let (keeper, _, tables) = setup();
        let doc = put(&tables, "p1", 100);
        // Stale entry left behind, as if a racing remove won.
        tables["onlines"].remove(&json!("1"), &json!("p1")).unwrap();
        keeper.track(&doc);

        assert_eq!(keeper.sweep(1_000, |name| tables.get(name).cloned()), 0);
        assert!(keeper.is_empty());
    }

    #[test]
    fn test_sweep_spares_replaced_document() {
        let (keeper, _, tables) = setup();
        let old = put(&tables, "p1", 100);
        let new = put(&tables, "p1", 5_000);
        // Stale entry for the replaced version.
        keeper.track(&old);

        assert_eq!(keeper.sweep(1_000, |name| tables.get(name).cloned()), 0);
        let stored = tables["onlines"].get("", &json!("1"), &json!("p1")).unwrap();
        assert!(Arc::ptr_eq(&stored, &new));
        assert_eq!(keeper.len(), 1);
    }

    #[test]
    fn test_sweep_drops_entries_of_unknown_tables() {
        let (keeper, _, tables) = setup();
        put(&tables, "p1", 100);
        assert_eq!(keeper.sweep(1_000, |_| None), 0);
        assert!(keeper.is_empty());
    }

    #[tokio::test]
    async fn test_background_sweep_runs() {
        let (keeper, counters, tables) = setup();
        let config = KeeperConfig::new().with_sweep_interval(Duration::from_millis(20));
        put(&tables, "p1", now_millis() - 1);
        put(&tables, "p2", now_millis() + 60_000);

        keeper.start(Arc::clone(&tables), Arc::clone(&counters), &config);
        assert!(keeper.is_running());
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(tables["onlines"].size(), 1);
        assert_eq!(counters.snapshot().expire, 1);
        keeper.stop();
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (keeper, counters, tables) = setup();
        let config = KeeperConfig::new().with_sweep_interval(Duration::from_millis(10));
        keeper.start(Arc::clone(&tables), Arc::clone(&counters), &config);
        keeper.stop();
        keeper.stop();
        assert!(!keeper.is_running());

        put(&tables, "p1", now_millis() - 1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(tables["onlines"].size(), 1);
    }
}
