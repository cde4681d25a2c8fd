//! # BingoDB
//!
//! An embeddable, schema-driven in-memory document store.
//!
//! Each table stores documents under a (hash, sort) primary key, keeps any
//! number of secondary indices ordered by other fields, and evicts documents
//! whose expire field has passed. Writes are upserts with merge semantics:
//! `set` always applies, `setOnInsert` only when the document is new.
//!
//! ## Quick Start
//!
//! ```no_run
//! use bingo_core::{Bingo, BingoConfig};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config: BingoConfig = r#"{
//!         "tables": {
//!             "onlines": {
//!                 "fields": {"channelId": "string", "personKey": "string",
//!                            "updatedAt": "integer", "expiresAt": "integer"},
//!                 "hashKey": "channelId",
//!                 "sortKey": "personKey",
//!                 "expireKey": "expiresAt",
//!                 "subIndices": {"guest": {"hashKey": "channelId", "sortKey": "updatedAt"}}
//!             }
//!         }
//!     }"#
//!     .parse()
//!     .unwrap();
//!
//!     let bingo = Bingo::from_config(&config).unwrap();
//!     bingo.start();
//!
//!     let onlines = bingo.table("onlines").unwrap();
//!     let set = json!({"channelId": "1", "personKey": "p1", "updatedAt": 1});
//!     onlines.put(set.as_object(), None).unwrap();
//!
//!     let doc = onlines.get("", &json!("1"), &json!("p1")).unwrap();
//!     assert_eq!(doc.to_json()["updatedAt"], 1);
//!
//!     let page = onlines.scan("guest", &json!("1"), None, 20, false).unwrap();
//!     assert_eq!(page.values.len(), 1);
//!
//!     bingo.stop();
//! }
//! ```

pub mod bingo;
pub mod config;
pub mod document;
pub mod error;
pub mod index;
pub mod keeper;
pub mod metrics;
pub mod table;
pub mod types;

pub use bingo::Bingo;
pub use config::BingoConfig;
pub use document::Document;
pub use error::{ConfigError, Error, Result};
pub use index::{Cursor, IndexRef, PutResult, ScanResult};
pub use keeper::KeeperConfig;
pub use metrics::{CounterSnapshot, TableInfo};
pub use table::Table;
pub use types::{FieldSchema, FieldType, Key, TableSchema, Value};
