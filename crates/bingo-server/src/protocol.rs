//! Wire protocol: JSON-over-newlines request/response types.
//!
//! Each request is a single JSON line tagged by `"op"`; each response is a
//! single JSON line carrying either `"ok": true` or an `"error"` kind.

use bingo_core::{Error, TableInfo};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Page size used when a scan does not ask for one.
pub const DEFAULT_SCAN_LIMIT: usize = 20;
/// Largest page a single scan may return.
pub const MAX_SCAN_LIMIT: usize = 1000;

/// Code for errors raised by the protocol layer rather than the store.
pub const PROTOCOL_ERROR_CODE: u16 = 1;

/// A request from a client.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Get {
        table: String,
        #[serde(default)]
        index: Option<String>,
        hash: Value,
        #[serde(default)]
        sort: Option<Value>,
    },
    Put {
        table: String,
        #[serde(default)]
        set: Option<Map<String, Value>>,
        #[serde(default, rename = "setOnInsert")]
        set_on_insert: Option<Map<String, Value>>,
    },
    Remove {
        table: String,
        hash: Value,
        #[serde(default)]
        sort: Option<Value>,
    },
    Scan {
        table: String,
        #[serde(default)]
        index: Option<String>,
        hash: Value,
        #[serde(default)]
        since: Option<Value>,
        #[serde(default)]
        limit: Option<usize>,
        #[serde(default)]
        backward: bool,
    },
    Tables,
}

/// A response sent back to the client.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Response {
    Ok(OkResponse),
    Error(ErrorResponse),
}

/// Successful response variants.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum OkResponse {
    Document {
        ok: bool,
        document: Value,
    },
    Put {
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        old: Option<Value>,
        new: Value,
        replaced: bool,
    },
    Scan {
        ok: bool,
        values: Vec<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        next: Option<Value>,
    },
    Tables {
        ok: bool,
        tables: Vec<TableInfo>,
    },
}

/// Error payload: the error kind, its stable code and a readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
    pub message: String,
}

impl Response {
    pub fn document(document: Value) -> Self {
        Response::Ok(OkResponse::Document { ok: true, document })
    }

    pub fn put(old: Option<Value>, new: Value, replaced: bool) -> Self {
        Response::Ok(OkResponse::Put {
            ok: true,
            old,
            new,
            replaced,
        })
    }

    pub fn scan(values: Vec<Value>, next: Option<Value>) -> Self {
        Response::Ok(OkResponse::Scan {
            ok: true,
            values,
            next,
        })
    }

    pub fn tables(tables: Vec<TableInfo>) -> Self {
        Response::Ok(OkResponse::Tables { ok: true, tables })
    }

    pub fn error(error: impl Into<String>, code: u16, message: impl Into<String>) -> Self {
        Response::Error(ErrorResponse {
            error: error.into(),
            code,
            message: message.into(),
        })
    }
}

impl From<Error> for Response {
    fn from(err: Error) -> Self {
        Response::error(err.kind(), err.code(), err.to_string())
    }
}
