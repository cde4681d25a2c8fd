//! Client library for connecting to a `bingo-server` via Unix socket.
//!
//! Each method serializes a JSON-line request, sends it, reads a JSON-line
//! response, and returns the parsed result.

use std::path::Path;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};

use crate::error::ClientError;
use crate::protocol::ErrorResponse;

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Outcome of a `put`.
#[derive(Debug, Clone)]
pub struct PutOutcome {
    pub old: Option<Value>,
    pub new: Value,
    pub replaced: bool,
}

/// One page of a scan.
#[derive(Debug, Clone)]
pub struct ScanPage {
    pub values: Vec<Value>,
    /// Pass back as `since` to read the following page.
    pub next: Option<Value>,
}

/// Parameters of a scan beyond table and hash.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub index: Option<String>,
    pub since: Option<Value>,
    pub limit: Option<usize>,
    pub backward: bool,
}

/// Client for a BingoDB server.
pub struct BingoClient {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    line_buf: String,
}

impl BingoClient {
    /// Connect to a BingoDB server at the given Unix socket path.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let stream = UnixStream::connect(path.as_ref()).await?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            line_buf: String::new(),
        })
    }

    /// Get a document by key, or `None` if it does not exist.
    ///
    /// With `index` set, `sort` is matched against that sub-index.
    pub async fn get(
        &mut self,
        table: &str,
        index: Option<&str>,
        hash: Value,
        sort: Option<Value>,
    ) -> Result<Option<Value>> {
        let req = json!({
            "op": "get",
            "table": table,
            "index": index,
            "hash": hash,
            "sort": sort,
        });
        let resp = self.send_request(&req).await?;
        optional(document_from_response(&resp))
    }

    /// Upsert a document.
    pub async fn put(&mut self, table: &str, set: Option<Value>, set_on_insert: Option<Value>) -> Result<PutOutcome> {
        let req = json!({
            "op": "put",
            "table": table,
            "set": set,
            "setOnInsert": set_on_insert,
        });
        let resp = self.send_request(&req).await?;
        check_error(&resp)?;
        let new = resp
            .get("new")
            .cloned()
            .ok_or_else(|| ClientError::Protocol("put response without 'new'".to_string()))?;
        Ok(PutOutcome {
            old: resp.get("old").filter(|v| !v.is_null()).cloned(),
            new,
            replaced: resp.get("replaced").and_then(Value::as_bool).unwrap_or(false),
        })
    }

    /// Remove a document, returning it, or `None` if it did not exist.
    pub async fn remove(&mut self, table: &str, hash: Value, sort: Option<Value>) -> Result<Option<Value>> {
        let req = json!({
            "op": "remove",
            "table": table,
            "hash": hash,
            "sort": sort,
        });
        let resp = self.send_request(&req).await?;
        optional(document_from_response(&resp))
    }

    /// Read one page of documents under `hash`.
    pub async fn scan(&mut self, table: &str, hash: Value, options: ScanOptions) -> Result<ScanPage> {
        let req = json!({
            "op": "scan",
            "table": table,
            "index": options.index,
            "hash": hash,
            "since": options.since,
            "limit": options.limit,
            "backward": options.backward,
        });
        let resp = self.send_request(&req).await?;
        check_error(&resp)?;
        let values = resp
            .get("values")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let next = resp.get("next").filter(|v| !v.is_null()).cloned();
        Ok(ScanPage { values, next })
    }

    /// Per-table diagnostics, as JSON objects.
    pub async fn tables(&mut self) -> Result<Vec<Value>> {
        let resp = self.send_request(&json!({"op": "tables"})).await?;
        check_error(&resp)?;
        Ok(resp
            .get("tables")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    /// Send a raw request line and return the raw response.
    pub async fn send_request(&mut self, req: &Value) -> Result<Value> {
        let mut data = serde_json::to_vec(req).map_err(ClientError::Serialization)?;
        data.push(b'\n');
        self.writer.write_all(&data).await?;
        self.writer.flush().await?;

        self.line_buf.clear();
        let n = self.reader.read_line(&mut self.line_buf).await?;
        if n == 0 {
            return Err(ClientError::Disconnected);
        }

        let resp: Value = serde_json::from_str(self.line_buf.trim()).map_err(ClientError::Serialization)?;
        Ok(resp)
    }
}

fn check_error(resp: &Value) -> Result<()> {
    if let Some(err) = resp.get("error") {
        let error = err.as_str().unwrap_or("Unknown").to_string();
        let code = resp
            .get("code")
            .and_then(Value::as_u64)
            .and_then(|c| u16::try_from(c).ok())
            .unwrap_or(0);
        let message = resp
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        return Err(ClientError::Server(ErrorResponse { error, code, message }));
    }
    Ok(())
}

fn document_from_response(resp: &Value) -> Result<Value> {
    check_error(resp)?;
    resp.get("document")
        .cloned()
        .ok_or_else(|| ClientError::Protocol("response without 'document'".to_string()))
}

/// Map a `DocumentNotFound` server error to `None`.
fn optional(result: Result<Value>) -> Result<Option<Value>> {
    match result {
        Ok(doc) => Ok(Some(doc)),
        Err(e) if e.kind() == Some("DocumentNotFound") => Ok(None),
        Err(e) => Err(e),
    }
}
