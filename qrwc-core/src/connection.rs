//! Connection Manager: the `Disconnected -> Connecting ->
//! Connected -> {Disconnecting, Reconnecting}` state machine that owns the
//! live WebSocket and feeds frames into the [`crate::transport::Transport`].
//! Grounded on the reconnect-with-backoff idiom in the retrieved
//! `websocket.rs` example, combined with the grounding crate's
//! `SidecarCircuitBreaker` pattern (now `qrwc_connectors::CircuitBreaker`)
//! for the cool-down/circuit-open behavior.

use crate::error::{BridgeError, BridgeResult};
use crate::metrics::MetricsCollector;
use crate::tls::{create_tls_client_config, TlsConfig};
use crate::transport::{OutboundFrame, Transport};
use futures_util::{SinkExt, StreamExt};
use qrwc_connectors::CircuitBreaker;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::Connector;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub secure: bool,
    pub reject_unauthorized: bool,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub missed_pong_limit: u32,
    pub circuit_failure_threshold: u32,
    pub circuit_reset_ms: u64,
}

impl ConnectionConfig {
    pub fn websocket_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{scheme}://{}:{}/qrc-public-api/v0", self.host, self.port)
    }
}

/// Owns the live socket and drives the state machine. Cheaply `Arc`-shared;
/// the transport itself is independent and exposed to callers (QRWC
/// Adapter) via [`ConnectionManager::transport`].
pub struct ConnectionManager {
    config: ConnectionConfig,
    transport: Arc<Transport>,
    outbound_rx: Mutex<Option<mpsc::Receiver<OutboundFrame>>>,
    state: Mutex<ConnectionState>,
    state_tx: broadcast::Sender<ConnectionState>,
    circuit: Mutex<CircuitBreaker>,
    metrics: Option<Arc<MetricsCollector>>,
    cancel: CancellationToken,
    disconnect_fired: AtomicBool,
    supervisor_started: AtomicBool,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig, metrics: Option<Arc<MetricsCollector>>) -> Arc<Self> {
        let (transport, outbound_rx) = Transport::new(crate::transport::DEFAULT_QUEUE_CAPACITY);
        let (state_tx, _) = broadcast::channel(16);
        let circuit = CircuitBreaker::new(
            config.circuit_failure_threshold,
            Duration::from_millis(config.circuit_reset_ms),
        );

        Arc::new(Self {
            config,
            transport: Arc::new(transport),
            outbound_rx: Mutex::new(Some(outbound_rx)),
            state: Mutex::new(ConnectionState::Disconnected),
            state_tx,
            circuit: Mutex::new(circuit),
            metrics,
            cancel: CancellationToken::new(),
            disconnect_fired: AtomicBool::new(false),
            supervisor_started: AtomicBool::new(false),
        })
    }

    pub fn transport(&self) -> Arc<Transport> {
        Arc::clone(&self.transport)
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.lock().await
    }

    pub fn subscribe_state(&self) -> broadcast::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    async fn set_state(&self, next: ConnectionState) {
        *self.state.lock().await = next;
        if let Some(metrics) = &self.metrics {
            metrics.update_connection(next.as_str());
        }
        let _ = self.state_tx.send(next);
    }

    /// Starts the supervisor loop. Idempotent: a second call while the
    /// supervisor is already running is a no-op.
    pub fn connect(self: &Arc<Self>) {
        if self.supervisor_started.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.supervise().await;
        });
    }

    async fn supervise(self: Arc<Self>) {
        let mut outbound_rx = self.outbound_rx.lock().await.take().expect("supervisor started twice");

        let mut attempt: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            if self.circuit.lock().await.is_open() {
                tracing::warn!("circuit open, suppressing connect attempt");
                if let Some(metrics) = &self.metrics {
                    metrics.record_circuit_open();
                }
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_millis(self.config.circuit_reset_ms)) => {}
                }
                continue;
            }

            self.set_state(ConnectionState::Connecting).await;
            match self.connect_once(&mut outbound_rx).await {
                Ok(()) => {
                    attempt = 0;
                    self.circuit.lock().await.record_success();
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    self.set_state(ConnectionState::Reconnecting).await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "connection attempt failed");
                    self.circuit.lock().await.record_failure();
                    self.transport.fail_pending().await;
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    self.set_state(ConnectionState::Reconnecting).await;

                    let delay = backoff_delay(
                        attempt,
                        Duration::from_millis(self.config.reconnect_base_ms),
                        Duration::from_millis(self.config.reconnect_max_ms),
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }

        self.set_state(ConnectionState::Disconnected).await;
    }

    /// Establishes one WebSocket connection and runs it to completion
    /// (clean close, error, or supervisor cancellation).
    async fn connect_once(&self, outbound_rx: &mut mpsc::Receiver<OutboundFrame>) -> BridgeResult<()> {
        let url = self.config.websocket_url();
        tracing::info!(url = %url, "connecting to Q-SYS Core");

        let connector = if self.config.secure {
            let tls_config = create_tls_client_config(&TlsConfig {
                enabled: true,
                reject_unauthorized: self.config.reject_unauthorized,
                ca_file: None,
            })?;
            Some(Connector::Rustls(Arc::new(tls_config)))
        } else {
            None
        };

        let (ws_stream, _response) = tokio_tungstenite::connect_async_tls_with_config(
            &url,
            None,
            false,
            connector,
        ).await.map_err(BridgeError::from)?;

        self.set_state(ConnectionState::Connected).await;
        tracing::info!("connected to Q-SYS Core");

        let (mut write, mut read) = ws_stream.split();
        let mut heartbeat = tokio::time::interval(Duration::from_millis(self.config.heartbeat_interval_ms));
        let mut missed_pongs: u32 = 0;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                _ = heartbeat.tick() => {
                    if write.send(Message::Ping(Vec::new().into())).await.is_err() {
                        return Err(BridgeError::NotConnected);
                    }
                    missed_pongs += 1;
                    if missed_pongs >= self.config.missed_pong_limit {
                        return Err(BridgeError::Timeout(self.config.heartbeat_interval_ms));
                    }
                }
                frame = outbound_rx.recv() => {
                    match frame {
                        Some(frame) => {
                            let text = frame.payload.to_string();
                            if write.send(Message::Text(text.into())).await.is_err() {
                                return Err(BridgeError::NotConnected);
                            }
                        }
                        None => return Err(BridgeError::Internal("outbound channel closed".into())),
                    }
                }
                message = read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            missed_pongs = 0;
                            self.transport.handle_incoming(&text).await;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            missed_pongs = 0;
                        }
                        Some(Ok(Message::Close(_))) => return Ok(()),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(BridgeError::from(e)),
                        None => return Ok(()),
                    }
                }
            }
        }
    }

    /// Idempotent; emits at most one "disconnecting" state transition
    /// regardless of how many times it is called.
    pub async fn disconnect(&self) {
        if self.disconnect_fired.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
            self.set_state(ConnectionState::Disconnecting).await;
            self.cancel.cancel();
            self.transport.fail_pending().await;
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Exponential backoff with +-20% jitter, base 1s/factor 2/cap 60s by
/// default, parameterized from config here.
fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exp = base.as_secs_f64() * 2f64.powi(attempt as i32);
    let capped = exp.min(max.as_secs_f64());
    let jitter = 1.0 + 0.20 * (2.0 * pseudo_random(attempt) - 1.0);
    Duration::from_secs_f64((capped * jitter).max(0.0))
}

/// Deterministic, dependency-free jitter source keyed by attempt number
/// (no `rand` involved so backoff delays are reproducible in tests).
fn pseudo_random(attempt: u32) -> f64 {
    let x = (attempt as f64 * 12.9898).sin() * 43758.5453;
    x.fract().abs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(60);
        let early = backoff_delay(0, base, max);
        let later = backoff_delay(10, base, max);
        assert!(early.as_secs_f64() <= 1.3);
        assert!(later.as_secs_f64() <= 72.0);
    }

    #[test]
    fn websocket_url_uses_qrc_public_api_path() {
        let config = ConnectionConfig {
            host: "core.local".into(),
            port: 443,
            secure: true,
            reject_unauthorized: false,
            reconnect_base_ms: 1000,
            reconnect_max_ms: 60_000,
            heartbeat_interval_ms: 30_000,
            missed_pong_limit: 3,
            circuit_failure_threshold: 5,
            circuit_reset_ms: 60_000,
        };
        assert_eq!(config.websocket_url(), "wss://core.local:443/qrc-public-api/v0");
    }

    #[tokio::test]
    async fn disconnect_is_idempotent_single_event() {
        let config = ConnectionConfig {
            host: "core.local".into(),
            port: 443,
            secure: false,
            reject_unauthorized: true,
            reconnect_base_ms: 1000,
            reconnect_max_ms: 60_000,
            heartbeat_interval_ms: 30_000,
            missed_pong_limit: 3,
            circuit_failure_threshold: 5,
            circuit_reset_ms: 60_000,
        };
        let manager = ConnectionManager::new(config, None);
        let mut states = manager.subscribe_state();

        manager.disconnect().await;
        manager.disconnect().await;
        manager.disconnect().await;

        let mut disconnecting_count = 0;
        while let Ok(state) = states.try_recv() {
            if state == ConnectionState::Disconnecting {
                disconnecting_count += 1;
            }
        }
        assert_eq!(disconnecting_count, 1);
    }
}
