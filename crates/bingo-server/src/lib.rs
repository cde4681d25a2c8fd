//! BingoDB server and client library.
//!
//! Serves a `Bingo` store over a local Unix socket using newline-delimited
//! JSON, so several processes can share one in-memory store.

pub mod client;
pub mod error;
pub mod protocol;
pub mod server;

pub use client::BingoClient;
pub use server::BingoServer;
