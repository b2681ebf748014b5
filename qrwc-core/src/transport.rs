//! Transport: one outbound queue, one receive
//! demultiplexer, over a single WebSocket. Grounded on the reconnecting
//! WebSocket pattern in the retrieved `websocket.rs` example (broadcast
//! channel for unsolicited pushes, `CancellationToken`-aware tasks) but
//! split so the JSON-RPC id-correlation logic (`PendingRequests`) is
//! independent of any live socket and unit-testable with plain strings;
//! the Connection Manager (component B) owns dialing the socket and feeds
//! frames into this module.

use crate::error::{BridgeError, BridgeResult};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::time::Duration;

/// High-water mark on the outbound queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);
const NOTIFICATION_CHANNEL_CAPACITY: usize = 1024;

/// A framed outbound JSON-RPC request, handed to the writer task the
/// Connection Manager drives against the live socket.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    pub id: u64,
    pub payload: Value,
}

struct PendingEntry {
    responder: oneshot::Sender<BridgeResult<Value>>,
}

/// Correlates numeric JSON-RPC ids to outstanding callers, with a FIFO
/// fallback for the documented Core quirk where some error responses come
/// back with `id: null`.
struct PendingRequests {
    entries: Mutex<std::collections::HashMap<u64, PendingEntry>>,
    order: Mutex<VecDeque<u64>>,
}

impl PendingRequests {
    fn new() -> Self {
        Self {
            entries: Mutex::new(std::collections::HashMap::new()),
            order: Mutex::new(VecDeque::new()),
        }
    }

    async fn register(&self, id: u64) -> oneshot::Receiver<BridgeResult<Value>> {
        let (tx, rx) = oneshot::channel();
        self.entries.lock().await.insert(id, PendingEntry { responder: tx });
        self.order.lock().await.push_back(id);
        rx
    }

    async fn expire(&self, id: u64) {
        self.entries.lock().await.remove(&id);
        self.order.lock().await.retain(|existing| *existing != id);
    }

    async fn resolve(&self, id: u64, result: BridgeResult<Value>) -> bool {
        let entry = self.entries.lock().await.remove(&id);
        self.order.lock().await.retain(|existing| *existing != id);
        match entry {
            Some(entry) => {
                let _ = entry.responder.send(result);
                true
            }
            None => false,
        }
    }

    /// Resolves the oldest still-outstanding request -- the tie-break used
    /// when the Core replies with `id: null`.
    async fn resolve_oldest(&self, result: BridgeResult<Value>) -> bool {
        let oldest = self.order.lock().await.pop_front();
        match oldest {
            Some(id) => {
                if let Some(entry) = self.entries.lock().await.remove(&id) {
                    let _ = entry.responder.send(result);
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }

    async fn fail_all(&self, make_err: impl Fn() -> BridgeError) {
        let mut entries = self.entries.lock().await;
        let mut order = self.order.lock().await;
        for (_, entry) in entries.drain() {
            let _ = entry.responder.send(Err(make_err()));
        }
        order.clear();
    }
}

/// The JSON-RPC multiplexer. Cheaply `Arc`-shared; `send` may be called
/// concurrently from any number of tool-call tasks.
pub struct Transport {
    pending: Arc<PendingRequests>,
    next_id: AtomicU64,
    outbound_tx: mpsc::Sender<OutboundFrame>,
    notify_tx: broadcast::Sender<Value>,
    parse_errors: AtomicU64,
}

impl Transport {
    /// Returns the transport plus the receiving half of the outbound
    /// queue, which the Connection Manager's single writer task drains
    /// against the live socket.
    pub fn new(queue_capacity: usize) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(queue_capacity.max(1));
        let (notify_tx, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);
        (
            Self {
                pending: Arc::new(PendingRequests::new()),
                next_id: AtomicU64::new(1),
                outbound_tx,
                notify_tx,
                parse_errors: AtomicU64::new(0),
            },
            outbound_rx,
        )
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Value> {
        self.notify_tx.subscribe()
    }

    pub fn parse_error_count(&self) -> u64 {
        self.parse_errors.load(Ordering::Relaxed)
    }

    /// `send(method, params, timeout)` allocates an id,
    /// registers a pending responder, enqueues the frame, and awaits the
    /// correlated response (or the oldest-outstanding response for the
    /// Core's `id: null` quirk).
    pub async fn send(&self, method: &str, params: Value, timeout: Duration) -> BridgeResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let rx = self.pending.register(id).await;

        if self.outbound_tx.try_send(OutboundFrame { id, payload }).is_err() {
            self.pending.expire(id).await;
            return Err(BridgeError::Backpressure);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BridgeError::NotConnected),
            Err(_) => {
                self.pending.expire(id).await;
                Err(BridgeError::Timeout(timeout.as_millis() as u64))
            }
        }
    }

    /// Feeds one received text frame through id-correlation. Frames that
    /// fail to parse increment `parse_error_count` and are dropped.
    pub async fn handle_incoming(&self, raw: &str) {
        let value: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                self.parse_errors.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(error = %e, "dropping unparseable frame");
                return;
            }
        };

        match value.get("id") {
            Some(Value::Number(n)) => {
                let id = n.as_u64().unwrap_or_default();
                let result = response_to_result(&value);
                if !self.pending.resolve(id, result).await {
                    tracing::debug!(id, "response for unknown or already-resolved id");
                }
            }
            Some(Value::Null) => {
                // Documented Core quirk: some error responses carry id:null.
                let result = response_to_result(&value);
                if !self.pending.resolve_oldest(result).await {
                    tracing::debug!("id:null response with no outstanding request");
                }
            }
            _ => {
                let _ = self.notify_tx.send(value);
            }
        }
    }

    /// Fails every outstanding request -- called by the Connection Manager
    /// when the socket drops, so callers don't hang until their timeout.
    pub async fn fail_pending(&self) {
        self.pending.fail_all(|| BridgeError::NotConnected).await;
    }
}

fn response_to_result(value: &Value) -> BridgeResult<Value> {
    if let Some(error) = value.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(-1);
        let message = error.get("message").and_then(Value::as_str).unwrap_or("unknown Core error").to_string();
        return Err(BridgeError::CoreError { code, message });
    }
    Ok(value.get("result").cloned().unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_resolves_on_matching_id() {
        let (transport, mut outbound_rx) = Transport::new(DEFAULT_QUEUE_CAPACITY);
        let transport = Arc::new(transport);
        let t2 = Arc::clone(&transport);

        let send_task = tokio::spawn(async move {
            t2.send("StatusGet", serde_json::json!({}), Duration::from_secs(1)).await
        });

        let frame = outbound_rx.recv().await.unwrap();
        transport.handle_incoming(&format!(r#"{{"jsonrpc":"2.0","id":{},"result":{{"ok":true}}}}"#, frame.id)).await;

        let result = send_task.await.unwrap().unwrap();
        assert_eq!(result, serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn id_null_resolves_oldest_outstanding() {
        let (transport, mut outbound_rx) = Transport::new(DEFAULT_QUEUE_CAPACITY);
        let transport = Arc::new(transport);

        let t_a = Arc::clone(&transport);
        let task_a = tokio::spawn(async move {
            t_a.send("A", serde_json::json!({}), Duration::from_secs(1)).await
        });
        let _frame_a = outbound_rx.recv().await.unwrap();

        let t_b = Arc::clone(&transport);
        let task_b = tokio::spawn(async move {
            t_b.send("B", serde_json::json!({}), Duration::from_secs(1)).await
        });
        let _frame_b = outbound_rx.recv().await.unwrap();

        transport.handle_incoming(r#"{"jsonrpc":"2.0","id":null,"result":{"first":true}}"#).await;

        let result_a = task_a.await.unwrap().unwrap();
        assert_eq!(result_a, serde_json::json!({"first": true}));
        assert!(!task_b.is_finished());
    }

    #[tokio::test]
    async fn timeout_expires_pending_entry() {
        let (transport, _outbound_rx) = Transport::new(DEFAULT_QUEUE_CAPACITY);
        let result = transport.send("Slow", serde_json::json!({}), Duration::from_millis(10)).await;
        assert!(matches!(result, Err(BridgeError::Timeout(_))));
    }

    #[tokio::test]
    async fn unparseable_frame_increments_counter_and_is_dropped() {
        let (transport, _outbound_rx) = Transport::new(DEFAULT_QUEUE_CAPACITY);
        transport.handle_incoming("not json").await;
        assert_eq!(transport.parse_error_count(), 1);
    }

    #[tokio::test]
    async fn frame_without_id_is_a_notification() {
        let (transport, _outbound_rx) = Transport::new(DEFAULT_QUEUE_CAPACITY);
        let mut notifications = transport.subscribe_notifications();
        transport.handle_incoming(r#"{"method":"EngineStatus","params":{"state":"Active"}}"#).await;
        let notification = notifications.recv().await.unwrap();
        assert_eq!(notification["method"], "EngineStatus");
    }

    #[tokio::test]
    async fn backpressure_when_queue_full() {
        let (transport, _outbound_rx) = Transport::new(1);
        // Fill the one slot without anyone draining it.
        let first = transport.send("A", serde_json::json!({}), Duration::from_millis(50));
        let second = transport.send("B", serde_json::json!({}), Duration::from_millis(50));
        let (_r1, r2) = tokio::join!(first, second);
        assert!(matches!(r2, Err(BridgeError::Backpressure)) || matches!(r2, Err(BridgeError::Timeout(_))));
    }
}
