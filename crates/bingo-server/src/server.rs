//! Unix domain socket server that wraps a shared `Bingo` store.
//!
//! Each connected client sends JSON-line requests and receives JSON-line
//! responses. The store needs no outer lock: reads are lock-free and writes
//! serialize per document key inside the store.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bingo_core::{Bingo, Result};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::protocol::{DEFAULT_SCAN_LIMIT, MAX_SCAN_LIMIT, PROTOCOL_ERROR_CODE, Request, Response};

/// A BingoDB server listening on a Unix socket.
pub struct BingoServer {
    bingo: Arc<Bingo>,
    socket_path: PathBuf,
    metrics_interval: Option<Duration>,
}

impl BingoServer {
    pub fn new(bingo: Arc<Bingo>, socket_path: PathBuf) -> Self {
        Self {
            bingo,
            socket_path,
            metrics_interval: None,
        }
    }

    /// Log operation counters and table sizes every `interval`.
    pub fn with_metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    /// Run the server until SIGINT or SIGTERM.
    pub async fn run(&self) -> std::io::Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Run the server, accepting connections until `shutdown` completes.
    ///
    /// On startup, removes any stale socket file, binds a new one and starts
    /// the expiry sweep. On shutdown, stops the sweep and removes the socket
    /// file before returning.
    pub async fn run_until(&self, shutdown: impl Future<Output = ()>) -> std::io::Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        info!(path = %self.socket_path.display(), "server listening");

        self.bingo.start();
        let (reporter_tx, reporter_rx) = watch::channel(false);
        if let Some(interval) = self.metrics_interval {
            tokio::spawn(report_metrics(Arc::clone(&self.bingo), interval, reporter_rx));
        }

        let accept_loop = async {
            loop {
                match listener.accept().await {
                    Ok((stream, _addr)) => {
                        let bingo = Arc::clone(&self.bingo);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(bingo, stream).await {
                                warn!(error = %e, "connection handler error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "accept error");
                    }
                }
            }
        };

        tokio::select! {
            _ = accept_loop => {}
            _ = shutdown => {
                info!("shutdown signal received");
            }
        }

        let _ = reporter_tx.send(true);
        self.bingo.stop();

        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(error = %e, "failed to remove socket file on shutdown");
            } else {
                info!(path = %self.socket_path.display(), "socket file removed");
            }
        }

        Ok(())
    }
}

async fn handle_connection(bingo: Arc<Bingo>, stream: tokio::net::UnixStream) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(trimmed) {
            Ok(req) => dispatch(&bingo, req),
            Err(e) => Response::error("ParseError", PROTOCOL_ERROR_CODE, e.to_string()),
        };

        let mut resp_bytes = match serde_json::to_vec(&response) {
            Ok(bytes) => bytes,
            Err(e) => {
                let fallback = Response::error("SerializationError", PROTOCOL_ERROR_CODE, e.to_string());
                serde_json::to_vec(&fallback).map_err(std::io::Error::other)?
            }
        };
        resp_bytes.push(b'\n');

        writer.write_all(&resp_bytes).await?;
        writer.flush().await?;
    }

    Ok(())
}

fn dispatch(bingo: &Bingo, req: Request) -> Response {
    let result = match req {
        Request::Get {
            table,
            index,
            hash,
            sort,
        } => handle_get(bingo, &table, index.as_deref(), hash, sort),

        Request::Put {
            table,
            set,
            set_on_insert,
        } => handle_put(bingo, &table, set, set_on_insert),

        Request::Remove { table, hash, sort } => handle_remove(bingo, &table, hash, sort),

        Request::Scan {
            table,
            index,
            hash,
            since,
            limit,
            backward,
        } => handle_scan(bingo, &table, index.as_deref(), hash, since, limit, backward),

        Request::Tables => Ok(Response::tables(bingo.tables_info())),
    };
    result.unwrap_or_else(Response::from)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn handle_get(bingo: &Bingo, table: &str, index: Option<&str>, hash: Value, sort: Option<Value>) -> Result<Response> {
    let table = bingo.table(table)?;
    let doc = table.get(index.unwrap_or(""), &hash, &sort.unwrap_or(Value::Null))?;
    Ok(Response::document(doc.to_json()))
}

fn handle_put(
    bingo: &Bingo,
    table: &str,
    set: Option<serde_json::Map<String, Value>>,
    set_on_insert: Option<serde_json::Map<String, Value>>,
) -> Result<Response> {
    let table = bingo.table(table)?;
    let result = table.put(set.as_ref(), set_on_insert.as_ref())?;
    Ok(Response::put(
        result.old.map(|old| old.to_json()),
        result.new.to_json(),
        result.replaced,
    ))
}

fn handle_remove(bingo: &Bingo, table: &str, hash: Value, sort: Option<Value>) -> Result<Response> {
    let table = bingo.table(table)?;
    let removed = table.remove(&hash, &sort.unwrap_or(Value::Null))?;
    Ok(Response::document(removed.to_json()))
}

fn handle_scan(
    bingo: &Bingo,
    table: &str,
    index: Option<&str>,
    hash: Value,
    since: Option<Value>,
    limit: Option<usize>,
    backward: bool,
) -> Result<Response> {
    let table = bingo.table(table)?;
    let limit = limit.unwrap_or(DEFAULT_SCAN_LIMIT).clamp(1, MAX_SCAN_LIMIT);
    let page = table.scan(index.unwrap_or(""), &hash, since.as_ref(), limit, backward)?;
    Ok(Response::scan(
        page.values.iter().map(|doc| doc.to_json()).collect(),
        page.next.map(|next| next.to_json()),
    ))
}

/// Periodically log and reset the operation counters, plus table sizes.
async fn report_metrics(bingo: Arc<Bingo>, interval: Duration, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let c = bingo.counters().take();
                info!(get = c.get, put = c.put, remove = c.remove, scan = c.scan, expire = c.expire, "operation counters");
                for table in bingo.tables_info() {
                    info!(table = %table.name, size = table.size, "table size");
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

/// Wait for SIGINT (Ctrl-C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to register SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
