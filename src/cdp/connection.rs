use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::error::{NodeshotError, Result};

/// Upper bound on one CDP round trip. Only guards the browser transport;
/// messages between the controller, page and relay never time out.
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// A CDP event (a message without an `id`).
#[derive(Debug, Clone)]
pub struct CdpEvent {
    pub method: String,
    pub params: Value,
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

/// One WebSocket session with a page target.
///
/// Commands are correlated with their responses by id; everything else is
/// forwarded to the event channel returned by [`CdpConnection::take_events`].
pub struct CdpConnection {
    tx: mpsc::UnboundedSender<String>,
    pending: Pending,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    events: std::sync::Mutex<Option<mpsc::UnboundedReceiver<CdpEvent>>>,
}

impl CdpConnection {
    pub async fn connect(ws_url: &str) -> Result<Self> {
        let (ws, _) = connect_async(ws_url).await.map_err(|e| {
            NodeshotError::CdpConnectionFailed(format!("WebSocket connection failed: {}", e))
        })?;
        tracing::debug!("Connected to {}", ws_url);

        let (mut write, mut read) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));

        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if write.send(Message::Text(msg.into())).await.is_err() {
                    break;
                }
            }
            let _ = write.close().await;
        });

        let closed = Arc::new(AtomicBool::new(false));
        let reader_closed = closed.clone();
        let reader_pending = pending.clone();
        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        let value: Value = match serde_json::from_str(text.as_str()) {
                            Ok(value) => value,
                            Err(e) => {
                                tracing::warn!("Invalid JSON from browser: {}", e);
                                continue;
                            }
                        };
                        route(value, &reader_pending, &event_tx).await;
                    }
                    Ok(Message::Close(_)) => break,
                    Err(e) => {
                        tracing::warn!("CDP WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            tracing::debug!("CDP connection closed");
            reader_closed.store(true, Ordering::Release);
            // Dropping the senders fails every outstanding call.
            reader_pending.lock().await.clear();
        });

        Ok(Self {
            tx,
            pending,
            next_id: AtomicU64::new(1),
            closed,
            events: std::sync::Mutex::new(Some(event_rx)),
        })
    }

    /// True once the browser side of the socket is gone.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// The event stream. Can be taken once.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<CdpEvent>> {
        self.events.lock().ok()?.take()
    }

    /// Send a command and wait for its `result`.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, reply);

        let request = serde_json::json!({ "id": id, "method": method, "params": params });
        tracing::debug!("-> {} #{}", method, id);
        if self.tx.send(request.to_string()).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(closed());
        }

        let response = match tokio::time::timeout(CALL_TIMEOUT, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(closed()),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(NodeshotError::CommunicationFailure(format!(
                    "{} timed out",
                    method
                )));
            }
        };

        if let Some(error) = response.get("error") {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(NodeshotError::CommunicationFailure(format!(
                "{} failed: {}",
                method, message
            )));
        }
        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Evaluate an expression in the page and return its JSON value.
    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        let result = self
            .call(
                "Runtime.evaluate",
                serde_json::json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;

        if let Some(details) = result.get("exceptionDetails") {
            let message = details
                .pointer("/exception/description")
                .or_else(|| details.get("text"))
                .and_then(|m| m.as_str())
                .unwrap_or("Uncaught exception");
            return Err(NodeshotError::JavaScriptError(message.to_string()));
        }

        Ok(result
            .pointer("/result/value")
            .cloned()
            .unwrap_or(Value::Null))
    }
}

async fn route(value: Value, pending: &Pending, events: &mpsc::UnboundedSender<CdpEvent>) {
    if let Some(id) = value.get("id").and_then(|i| i.as_u64()) {
        match pending.lock().await.remove(&id) {
            Some(sender) => {
                let _ = sender.send(value);
            }
            None => tracing::warn!("Response for unknown request id: {}", id),
        }
        return;
    }

    if let Some(method) = value.get("method").and_then(|m| m.as_str()) {
        let event = CdpEvent {
            method: method.to_string(),
            params: value.get("params").cloned().unwrap_or(Value::Null),
        };
        let _ = events.send(event);
    }
}

fn closed() -> NodeshotError {
    NodeshotError::CdpConnectionFailed("Connection to the page was closed".to_string())
}
