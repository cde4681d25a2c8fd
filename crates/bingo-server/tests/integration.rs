//! Integration tests for bingo-server: start server, connect client, verify ops.

use std::sync::Arc;

use serde_json::json;
use tempfile::tempdir;
use tokio::sync::oneshot;
use tokio::time::{Duration, sleep};

use bingo_core::{Bingo, BingoConfig, KeeperConfig};
use bingo_server::client::{BingoClient, ScanOptions};
use bingo_server::server::BingoServer;

const CONFIG: &str = r#"{
    "tables": {
        "onlines": {
            "fields": {
                "channelId": "string",
                "personKey": "string",
                "name": "string",
                "updatedAt": "integer",
                "expiresAt": "integer"
            },
            "hashKey": "channelId",
            "sortKey": "personKey",
            "expireKey": "expiresAt",
            "subIndices": {"guest": {"hashKey": "channelId", "sortKey": "updatedAt"}}
        }
    }
}"#;

fn now_millis() -> i64 {
    bingo_core::keeper::now_millis()
}

fn test_bingo() -> Arc<Bingo> {
    let config: BingoConfig = CONFIG.parse().unwrap();
    let keeper = KeeperConfig::new().with_sweep_interval(Duration::from_millis(20));
    Arc::new(Bingo::new(config.build().unwrap(), keeper))
}

/// Start a server on a temp socket and return the socket path.
/// The server runs in a background tokio task.
async fn start_test_server() -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempdir().unwrap();
    let socket_path = dir.path().join("test.sock");

    let server = BingoServer::new(test_bingo(), socket_path.clone());
    tokio::spawn(async move {
        server.run().await.unwrap();
    });

    // Give the server a moment to bind.
    sleep(Duration::from_millis(50)).await;

    (dir, socket_path)
}

#[tokio::test]
async fn test_put_get_remove() {
    let (_dir, sock) = start_test_server().await;
    let mut client = BingoClient::connect(&sock).await.unwrap();

    let first = client
        .put(
            "onlines",
            Some(json!({"channelId": "1", "personKey": "p4", "expiresAt": 2800000000000i64, "updatedAt": 1400000000000i64})),
            None,
        )
        .await
        .unwrap();
    assert!(!first.replaced);
    assert!(first.old.is_none());

    let second = client
        .put(
            "onlines",
            Some(json!({"channelId": "1", "personKey": "p4", "updatedAt": 1500000000000i64})),
            None,
        )
        .await
        .unwrap();
    assert!(second.replaced);
    assert_eq!(second.old.unwrap()["updatedAt"], 1400000000000i64);
    assert_eq!(second.new["expiresAt"], 2800000000000i64);
    assert_eq!(second.new["updatedAt"], 1500000000000i64);

    let doc = client
        .get("onlines", None, json!("1"), Some(json!("p4")))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(doc["updatedAt"], 1500000000000i64);

    let by_guest = client
        .get("onlines", Some("guest"), json!("1"), Some(json!(1500000000000i64)))
        .await
        .unwrap();
    assert_eq!(by_guest.unwrap()["personKey"], "p4");

    let removed = client.remove("onlines", json!("1"), Some(json!("p4"))).await.unwrap();
    assert!(removed.is_some());
    assert!(client.remove("onlines", json!("1"), Some(json!("p4"))).await.unwrap().is_none());
    assert!(client.get("onlines", None, json!("1"), Some(json!("p4"))).await.unwrap().is_none());
}

#[tokio::test]
async fn test_scan_pages_both_directions() {
    let (_dir, sock) = start_test_server().await;
    let mut client = BingoClient::connect(&sock).await.unwrap();

    for (person, at) in [("person1", 30), ("person2", 20), ("person3", 10)] {
        client
            .put(
                "onlines",
                Some(json!({"channelId": "1", "personKey": person, "updatedAt": at})),
                None,
            )
            .await
            .unwrap();
    }

    let page = client
        .scan("onlines", json!("1"), ScanOptions { limit: Some(1), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(page.values[0]["personKey"], "person1");
    assert_eq!(page.next, Some(json!("person2")));

    let page = client
        .scan(
            "onlines",
            json!("1"),
            ScanOptions {
                since: Some(json!("person2")),
                limit: Some(1),
                backward: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(page.values[0]["personKey"], "person2");
    assert_eq!(page.next, Some(json!("person1")));

    // Walk the sub-index using the returned composite cursor.
    let mut since = None;
    let mut seen = Vec::new();
    loop {
        let page = client
            .scan(
                "onlines",
                json!("1"),
                ScanOptions {
                    index: Some("guest".to_string()),
                    since: since.take(),
                    limit: Some(2),
                    backward: false,
                },
            )
            .await
            .unwrap();
        seen.extend(page.values.iter().map(|v| v["personKey"].as_str().unwrap().to_string()));
        match page.next {
            Some(next) => {
                assert!(next.is_array());
                since = Some(next);
            }
            None => break,
        }
    }
    assert_eq!(seen, vec!["person3", "person2", "person1"]);
}

#[tokio::test]
async fn test_error_responses() {
    let (_dir, sock) = start_test_server().await;
    let mut client = BingoClient::connect(&sock).await.unwrap();

    let err = client.get("nope", None, json!("1"), None).await.unwrap_err();
    assert_eq!(err.kind(), Some("TableNotFound"));

    let err = client.put("onlines", None, None).await.unwrap_err();
    assert_eq!(err.kind(), Some("SetOrInsertMissing"));

    let err = client
        .put("onlines", Some(json!({"personKey": "p"})), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), Some("HashKeyMissing"));

    let err = client
        .scan(
            "onlines",
            json!("1"),
            ScanOptions {
                index: Some("missing".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), Some("IndexNotFound"));

    let resp = client.send_request(&json!({"op": "explode"})).await.unwrap();
    assert_eq!(resp["error"], "ParseError");
}

#[tokio::test]
async fn test_tables_and_expiry() {
    let (_dir, sock) = start_test_server().await;
    let mut client = BingoClient::connect(&sock).await.unwrap();

    client
        .put(
            "onlines",
            Some(json!({"channelId": "1", "personKey": "gone", "expiresAt": now_millis() - 1})),
            None,
        )
        .await
        .unwrap();
    client
        .put(
            "onlines",
            Some(json!({"channelId": "1", "personKey": "kept", "expiresAt": now_millis() + 60_000})),
            None,
        )
        .await
        .unwrap();

    sleep(Duration::from_millis(100)).await;

    assert!(client.get("onlines", None, json!("1"), Some(json!("gone"))).await.unwrap().is_none());
    let tables = client.tables().await.unwrap();
    assert_eq!(tables[0]["name"], "onlines");
    assert_eq!(tables[0]["size"], 1);
    assert_eq!(tables[0]["subIndices"][0]["size"], 1);
}

#[tokio::test]
async fn test_concurrent_clients() {
    let (_dir, sock) = start_test_server().await;

    let mut handles = Vec::new();
    for c in 0..4 {
        let sock = sock.clone();
        handles.push(tokio::spawn(async move {
            let mut client = BingoClient::connect(&sock).await.unwrap();
            for i in 0..25 {
                client
                    .put(
                        "onlines",
                        Some(json!({"channelId": "shared", "personKey": format!("c{c}-{i}"), "updatedAt": i})),
                        None,
                    )
                    .await
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let mut client = BingoClient::connect(&sock).await.unwrap();
    let page = client
        .scan("onlines", json!("shared"), ScanOptions { limit: Some(1000), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(page.values.len(), 100);
    assert!(page.next.is_none());
}

#[tokio::test]
async fn test_shutdown_removes_socket() {
    let dir = tempdir().unwrap();
    let socket_path = dir.path().join("shutdown.sock");
    let bingo = test_bingo();
    let server = BingoServer::new(Arc::clone(&bingo), socket_path.clone());

    let (tx, rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        server
            .run_until(async {
                let _ = rx.await;
            })
            .await
    });

    sleep(Duration::from_millis(50)).await;
    assert!(socket_path.exists());
    assert!(bingo.keeper().is_running());

    tx.send(()).unwrap();
    task.await.unwrap().unwrap();
    assert!(!socket_path.exists());
    assert!(!bingo.keeper().is_running());
}
