//! The table registry and its expiry lifecycle.

use std::sync::Arc;

use tracing::info;

use crate::config::BingoConfig;
use crate::error::{Error, Result};
use crate::keeper::{Keeper, KeeperConfig, TableMap};
use crate::metrics::{Counters, TableInfo};
use crate::table::Table;
use crate::types::TableSchema;

/// An in-memory document store: a fixed set of tables sharing one keeper.
///
/// The table set is built once at construction and never changes, so lookups
/// take no locks. `Bingo` is `Send + Sync`; share it behind an `Arc`.
pub struct Bingo {
    tables: Arc<TableMap>,
    keeper: Arc<Keeper>,
    counters: Arc<Counters>,
    keeper_config: KeeperConfig,
}

impl Bingo {
    /// Build a store from validated schemas. The keeper is not started.
    pub fn new(schemas: Vec<Arc<TableSchema>>, keeper_config: KeeperConfig) -> Self {
        let keeper = Arc::new(Keeper::new());
        let counters = Arc::new(Counters::new());
        let tables = schemas
            .into_iter()
            .map(|schema| {
                let name = schema.name.clone();
                let table = Table::new(schema, Arc::clone(&keeper), Arc::clone(&counters));
                (name, Arc::new(table))
            })
            .collect();

        Self {
            tables: Arc::new(tables),
            keeper,
            counters,
            keeper_config,
        }
    }

    pub fn from_config(config: &BingoConfig) -> Result<Self> {
        let schemas = config.build()?;
        let bingo = Self::new(schemas, config.server.keeper_config());
        info!(tables = bingo.tables.len(), "store created");
        Ok(bingo)
    }

    pub fn table(&self, name: &str) -> Result<&Arc<Table>> {
        self.tables
            .get(name)
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn tables_info(&self) -> Vec<TableInfo> {
        self.tables.values().map(|table| table.info()).collect()
    }

    pub fn counters(&self) -> &Arc<Counters> {
        &self.counters
    }

    pub fn keeper(&self) -> &Arc<Keeper> {
        &self.keeper
    }

    /// Start the periodic expiry sweep.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context.
    pub fn start(&self) {
        self.keeper.start(
            Arc::clone(&self.tables),
            Arc::clone(&self.counters),
            &self.keeper_config,
        );
    }

    /// Stop the expiry sweep. Idempotent.
    pub fn stop(&self) {
        self.keeper.stop();
    }

    /// Run one sweep immediately with the given clock, outside the timer.
    pub fn sweep(&self, now_ms: i64) -> usize {
        let expired = self.keeper.sweep(now_ms, |name| self.tables.get(name).cloned());
        self.counters.record_expire(expired as u64);
        expired
    }
}

impl Drop for Bingo {
    fn drop(&mut self) {
        self.keeper.stop();
    }
}
