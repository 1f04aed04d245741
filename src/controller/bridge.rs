//! Long-lived streaming connection to the controller's event socket (§4.F).
//!
//! Grounded on `ha/websocket.py`'s `HomeAssistantWebSocket`: the same
//! handshake (`auth_required` → `auth` → `auth_ok`), the same
//! subscribe/dispatch/reconnect shape, and the same doubling backoff
//! (1s → 60s cap, reset on a fresh `auth_ok`). Unlike the original, reads
//! and command responses share one socket here too, so `send_command`
//! correlates replies through a pending-request map instead of the
//! original's "scan the stream until our id shows up" loop, which would
//! steal frames meant for the dispatch path.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::{FutureExt, SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{Mutex, Notify, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::error::{Error, Result};

use super::types::ControllerEvent;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

pub type EventHandler = Arc<dyn Fn(ControllerEvent) -> BoxFuture<'static, ()> + Send + Sync>;

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Streaming socket client: subscribes to controller events, dispatches
/// them to registered handlers, and lets callers issue commands over the
/// same connection, all behind automatic reconnect-with-backoff.
pub struct ControllerEventBridge {
    ws_url: String,
    token: String,
    handlers: Mutex<HashMap<String, Vec<EventHandler>>>,
    next_id: AtomicI64,
    pending: Mutex<HashMap<i64, oneshot::Sender<Value>>>,
    outbound: Mutex<Option<tokio::sync::mpsc::UnboundedSender<WsMessage>>>,
    stop: Notify,
    stopped: std::sync::atomic::AtomicBool,
    authenticated: std::sync::atomic::AtomicBool,
}

impl ControllerEventBridge {
    pub fn new(ws_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            token: token.into(),
            handlers: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(0),
            pending: Mutex::new(HashMap::new()),
            outbound: Mutex::new(None),
            stop: Notify::new(),
            stopped: std::sync::atomic::AtomicBool::new(false),
            authenticated: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Registers a handler for `event_type`, or for every event when
    /// `event_type` is `"*"`. Must be called before [`Self::run`], since
    /// subscriptions re-register across reconnects but handlers don't
    /// change.
    pub async fn on_event(&self, event_type: &str, handler: EventHandler) {
        self.handlers.entry(event_type.to_string()).or_default().push(handler);
    }

    /// Connects, authenticates, subscribes, and dispatches events forever,
    /// reconnecting with exponential backoff until [`Self::stop`] is called.
    pub async fn run(self: &Arc<Self>, subscribe_event_types: &[&str]) {
        let mut backoff = INITIAL_BACKOFF;

        loop {
            if self.stopped.load(Ordering::SeqCst) {
                return;
            }

            self.authenticated.store(false, Ordering::SeqCst);

            match self.connect_and_serve(subscribe_event_types).await {
                Ok(()) => {
                    tracing::info!("controller event bridge disconnected cleanly");
                }
                Err(e) => {
                    tracing::error!(error = %e, "controller event bridge connection failed");
                }
            }

            self.fail_all_pending().await;
            *self.outbound.lock().await = None;

            if self.stopped.load(Ordering::SeqCst) {
                return;
            }

            // A connection that got past auth_ok before dropping counts as
            // healthy: reconnect immediately at the initial delay instead of
            // carrying over the doubled backoff from earlier failed attempts.
            if self.authenticated.load(Ordering::SeqCst) {
                backoff = INITIAL_BACKOFF;
            }

            tracing::info!(delay_secs = backoff.as_secs(), "reconnecting to controller event stream");
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = self.stop.notified() => return,
            }
            if !self.authenticated.load(Ordering::SeqCst) {
                backoff = std::cmp::min(backoff * 2, MAX_BACKOFF);
            }
        }
    }

    /// Breaks the dispatch loop and prevents further reconnect attempts.
    /// Idempotent.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop.notify_waiters();
    }

    async fn connect_and_serve(&self, subscribe_event_types: &[&str]) -> Result<()> {
        let (ws, _) = tokio_tungstenite::connect_async(&self.ws_url)
            .await
            .map_err(|e| Error::bridge(format!("connect failed: {e}")))?;

        let mut ws = self.authenticate(ws).await?;

        let (outbound_tx, mut outbound_rx) = tokio::sync::mpsc::unbounded_channel();
        *self.outbound.lock().await = Some(outbound_tx.clone());

        for event_type in subscribe_event_types {
            let id = self.next_id();
            let msg = serde_json::json!({"id": id, "type": "subscribe_events", "event_type": event_type});
            ws.send(WsMessage::Text(msg.to_string().into())).await.map_err(Error::WebSocket)?;
        }

        loop {
            tokio::select! {
                outbound = outbound_rx.recv() => {
                    match outbound {
                        Some(msg) => ws.send(msg).await.map_err(Error::WebSocket)?,
                        None => return Ok(()),
                    }
                }
                incoming = ws.next() => {
                    match incoming {
                        Some(Ok(WsMessage::Text(text))) => self.handle_frame(&text).await,
                        Some(Ok(WsMessage::Close(_))) | None => {
                            tracing::warn!("controller event socket closed");
                            return Ok(());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(Error::WebSocket(e)),
                    }
                }
                _ = self.stop.notified() => {
                    let _ = ws.close(None).await;
                    return Ok(());
                }
            }
        }
    }

    async fn authenticate(&self, mut ws: WsStream) -> Result<WsStream> {
        let auth_required = next_json_frame(&mut ws).await?;
        if auth_required.get("type").and_then(Value::as_str) != Some("auth_required") {
            return Err(Error::bridge("expected auth_required frame"));
        }

        ws.send(WsMessage::Text(serde_json::json!({"type": "auth", "access_token": self.token}).to_string().into()))
            .await
            .map_err(Error::WebSocket)?;

        let auth_result = next_json_frame(&mut ws).await?;
        match auth_result.get("type").and_then(Value::as_str) {
            Some("auth_ok") => {
                tracing::info!("controller event socket authenticated");
                self.authenticated.store(true, Ordering::SeqCst);
                Ok(ws)
            }
            _ => Err(Error::bridge(format!("authentication failed: {auth_result}"))),
        }
    }

    async fn handle_frame(&self, text: &str) {
        let frame: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed controller frame");
                return;
            }
        };

        match frame.get("type").and_then(Value::as_str) {
            Some("event") => {
                let event_data = frame.get("event").cloned().unwrap_or(Value::Null);
                let event: ControllerEvent = match serde_json::from_value(event_data) {
                    Ok(e) => e,
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping unparseable event frame");
                        return;
                    }
                };
                self.dispatch_event(event).await;
            }
            Some("result") => {
                if let Some(id) = frame.get("id").and_then(Value::as_i64) {
                    self.resolve_pending(id, frame).await;
                }
            }
            _ => {}
        }
    }

    async fn dispatch_event(&self, event: ControllerEvent) {
        let handlers = self.handlers.lock().await;
        let mut to_run: Vec<EventHandler> = handlers.get(event.event_type.as_str()).cloned().unwrap_or_default();
        to_run.extend(handlers.get("*").cloned().unwrap_or_default());
        drop(handlers);

        for handler in to_run {
            let event = event.clone();
            let event_type = event.event_type.clone();
            let result = std::panic::AssertUnwindSafe(handler(event)).catch_unwind().await;
            if result.is_err() {
                tracing::error!(event_type, "event handler panicked");
            }
        }
    }

    async fn resolve_pending(&self, id: i64, frame: Value) {
        let mut pending = self.pending.lock().await;
        if let Some(sender) = pending.remove(&id) {
            let _ = sender.send(frame);
        }
    }

    async fn fail_all_pending(&self) {
        let mut pending = self.pending.lock().await;
        for (_, sender) in pending.drain() {
            drop(sender);
        }
    }

    /// Sends `{id, type: command_type, ...extra}` and awaits the matching
    /// `result` frame, failing after 30s or immediately if disconnected.
    pub async fn send_command(&self, command_type: &str, extra: Value) -> Result<Value> {
        let outbound = self
            .outbound
            .lock()
            .await
            .clone()
            .ok_or_else(|| Error::bridge("not connected"))?;

        let id = self.next_id();
        let mut command = serde_json::json!({"id": id, "type": command_type});
        if let (Some(base), Some(extra)) = (command.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                base.insert(k.clone(), v.clone());
            }
        }

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        outbound
            .send(WsMessage::Text(command.to_string().into()))
            .map_err(|_| Error::bridge("not connected"))?;

        let frame = match timeout(COMMAND_TIMEOUT, rx).await {
            Ok(Ok(frame)) => frame,
            Ok(Err(_)) => return Err(Error::bridge("connection dropped while waiting for command result")),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(Error::timeout());
            }
        };

        if frame.get("success").and_then(Value::as_bool).unwrap_or(false) {
            Ok(frame.get("result").cloned().unwrap_or(Value::Null))
        } else {
            let message = frame.get("error").and_then(|e| e.get("message")).and_then(Value::as_str).unwrap_or("unknown error");
            Err(Error::bridge(format!("command failed: {message}")))
        }
    }

    /// Calls a service over the event socket rather than the REST API —
    /// used by tools that already hold a bridge handle and want to avoid
    /// opening a second connection.
    pub async fn call_service(&self, domain: &str, service: &str, service_data: Option<&Value>, target: Option<&Value>) -> Result<bool> {
        let mut extra = serde_json::json!({"domain": domain, "service": service});
        if let Some(data) = service_data {
            extra["service_data"] = data.clone();
        }
        if let Some(target) = target {
            extra["target"] = target.clone();
        }
        self.send_command("call_service", extra).await.map(|_| true)
    }
}

async fn next_json_frame(ws: &mut WsStream) -> Result<Value> {
    match ws.next().await {
        Some(Ok(WsMessage::Text(text))) => serde_json::from_str(&text).map_err(Error::Json),
        Some(Ok(_)) => Err(Error::bridge("unexpected non-text frame during handshake")),
        Some(Err(e)) => Err(Error::WebSocket(e)),
        None => Err(Error::bridge("connection closed during handshake")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn next_id_increments_from_one() {
        let bridge = ControllerEventBridge::new("ws://example", "tok");
        assert_eq!(bridge.next_id(), 1);
        assert_eq!(bridge.next_id(), 2);
    }

    #[tokio::test]
    async fn send_command_fails_fast_when_not_connected() {
        let bridge = ControllerEventBridge::new("ws://example", "tok");
        let result = bridge.send_command("ping", serde_json::json!({})).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn dispatch_event_runs_exact_and_catchall_handlers() {
        let bridge = ControllerEventBridge::new("ws://example", "tok");
        let exact_count = Arc::new(AtomicUsize::new(0));
        let catchall_count = Arc::new(AtomicUsize::new(0));

        let exact_clone = exact_count.clone();
        bridge
            .on_event(
                "state_changed",
                Arc::new(move |_event| {
                    let counter = exact_clone.clone();
                    Box::pin(async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                    })
                }),
            )
            .await;

        let catchall_clone = catchall_count.clone();
        bridge
            .on_event(
                "*",
                Arc::new(move |_event| {
                    let counter = catchall_clone.clone();
                    Box::pin(async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                    })
                }),
            )
            .await;

        let event = ControllerEvent {
            event_type: "state_changed".to_string(),
            data: serde_json::json!({}),
            time_fired: chrono::Utc::now(),
        };
        bridge.dispatch_event(event).await;

        assert_eq!(exact_count.load(Ordering::SeqCst), 1);
        assert_eq!(catchall_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn one_panicking_handler_does_not_block_others() {
        let bridge = ControllerEventBridge::new("ws://example", "tok");
        let ran = Arc::new(AtomicUsize::new(0));

        bridge
            .on_event(
                "telegram_text",
                Arc::new(|_event| Box::pin(async move { panic!("boom") })),
            )
            .await;
        let ran_clone = ran.clone();
        bridge
            .on_event(
                "telegram_text",
                Arc::new(move |_event| {
                    let counter = ran_clone.clone();
                    Box::pin(async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                    })
                }),
            )
            .await;

        let event = ControllerEvent {
            event_type: "telegram_text".to_string(),
            data: serde_json::json!({}),
            time_fired: chrono::Utc::now(),
        };
        bridge.dispatch_event(event).await;

        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
