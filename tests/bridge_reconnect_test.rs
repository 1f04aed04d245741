//! Scenario 6 (§8): the event bridge reconnects with doubling backoff
//! against a server that closes the connection immediately, then succeeds
//! once a server completes the `auth_required`/`auth`/`auth_ok` handshake.

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use mimir_agent::controller::ControllerEventBridge;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// Accepts `close_after` connections that it immediately drops, then one
/// connection it authenticates properly and leaves open until the test
/// shuts it down.
async fn spawn_flaky_server(close_after: usize) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let accepted2 = accepted.clone();

    tokio::spawn(async move {
        let mut count = 0usize;
        loop {
            let Ok((stream, _)) = listener.accept().await else { return };
            count += 1;
            accepted2.fetch_add(1, Ordering::SeqCst);

            if count <= close_after {
                // Drop the stream immediately: the client's connect_async
                // handshake itself will fail or the socket will close
                // mid-read, either way counting as a failed attempt.
                drop(stream);
                continue;
            }

            tokio::spawn(async move {
                let mut ws = match accept_async(stream).await {
                    Ok(ws) => ws,
                    Err(_) => return,
                };
                let _ = ws
                    .send(WsMessage::Text(serde_json::json!({"type": "auth_required"}).to_string().into()))
                    .await;
                match ws.next().await {
                    Some(Ok(WsMessage::Text(_))) => {}
                    _ => return,
                }
                let _ = ws
                    .send(WsMessage::Text(serde_json::json!({"type": "auth_ok"}).to_string().into()))
                    .await;

                // Answer the subscribe_events request so the handshake is
                // fully exercised, then idle until the client disconnects.
                if let Some(Ok(WsMessage::Text(text))) = ws.next().await {
                    if let Ok(frame) = serde_json::from_str::<serde_json::Value>(&text) {
                        if let Some(id) = frame.get("id").and_then(serde_json::Value::as_i64) {
                            let result = serde_json::json!({"id": id, "type": "result", "success": true, "result": null});
                            let _ = ws.send(WsMessage::Text(result.to_string().into())).await;
                        }
                    }
                }

                while ws.next().await.is_some() {}
            });
        }
    });

    (format!("ws://{addr}"), accepted)
}

#[tokio::test]
async fn reconnects_with_backoff_then_authenticates() {
    let (url, accepted) = spawn_flaky_server(2).await;
    let bridge = Arc::new(ControllerEventBridge::new(url, "test-token"));

    let bridge2 = bridge.clone();
    let handle = tokio::spawn(async move {
        bridge2.run(&["telegram_text"]).await;
    });

    // Two failed attempts (1s, 2s backoff) then a successful connect and
    // handshake within the third attempt's window.
    tokio::time::sleep(Duration::from_millis(4_500)).await;

    assert!(accepted.load(Ordering::SeqCst) >= 3, "expected at least 3 connection attempts");

    bridge.stop();
    let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
}

/// Accepts `close_after` connections it drops immediately (growing the
/// backoff), then one connection it authenticates and drops right after
/// `auth_ok`, then holds every later connection open. Records the instant
/// each connection is accepted so the test can measure reconnect delays.
async fn spawn_server_dropping_after_auth(close_after: usize) -> (String, Arc<Mutex<Vec<Instant>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted_at = Arc::new(Mutex::new(Vec::new()));
    let accepted_at2 = accepted_at.clone();

    tokio::spawn(async move {
        let mut count = 0usize;
        loop {
            let Ok((stream, _)) = listener.accept().await else { return };
            count += 1;
            accepted_at2.lock().unwrap().push(Instant::now());

            if count <= close_after {
                drop(stream);
                continue;
            }

            let authenticate_then_drop = count == close_after + 1;
            tokio::spawn(async move {
                let mut ws = match accept_async(stream).await {
                    Ok(ws) => ws,
                    Err(_) => return,
                };
                let _ = ws
                    .send(WsMessage::Text(serde_json::json!({"type": "auth_required"}).to_string().into()))
                    .await;
                match ws.next().await {
                    Some(Ok(WsMessage::Text(_))) => {}
                    _ => return,
                }
                let _ = ws
                    .send(WsMessage::Text(serde_json::json!({"type": "auth_ok"}).to_string().into()))
                    .await;

                if authenticate_then_drop {
                    let _ = ws.close(None).await;
                    return;
                }

                if let Some(Ok(WsMessage::Text(text))) = ws.next().await {
                    if let Ok(frame) = serde_json::from_str::<serde_json::Value>(&text) {
                        if let Some(id) = frame.get("id").and_then(serde_json::Value::as_i64) {
                            let result = serde_json::json!({"id": id, "type": "result", "success": true, "result": null});
                            let _ = ws.send(WsMessage::Text(result.to_string().into())).await;
                        }
                    }
                }

                while ws.next().await.is_some() {}
            });
        }
    });

    (format!("ws://{addr}"), accepted_at)
}

#[tokio::test]
async fn backoff_resets_to_initial_delay_after_successful_auth() {
    // Two failed attempts first (1s, 2s backoff), so by the time the third
    // attempt authenticates-then-drops, the pre-fix behavior would carry a
    // 4s backoff into the next reconnect instead of resetting to 1s.
    let (url, accepted_at) = spawn_server_dropping_after_auth(2).await;
    let bridge = Arc::new(ControllerEventBridge::new(url, "test-token"));

    let bridge2 = bridge.clone();
    let handle = tokio::spawn(async move {
        bridge2.run(&["telegram_text"]).await;
    });

    // Attempt 1 at ~0s (fails), attempt 2 at ~1s (fails), attempt 3 at ~3s
    // (authenticates, then is dropped by the server), attempt 4 should
    // follow at ~4s (1s later) if the backoff reset, not ~7s (4s later).
    tokio::time::sleep(Duration::from_millis(5_500)).await;

    bridge.stop();
    let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;

    let timestamps = accepted_at.lock().unwrap().clone();
    assert!(timestamps.len() >= 4, "expected at least 4 connection attempts, got {}", timestamps.len());

    let gap_after_auth = timestamps[3] - timestamps[2];
    assert!(
        gap_after_auth < Duration::from_millis(2_500),
        "expected reconnect after a successful auth to use the initial backoff, took {gap_after_auth:?}"
    );
}
