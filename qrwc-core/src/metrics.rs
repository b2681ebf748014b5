//! In-process metrics, carried over from the grounding crate's
//! `metrics.rs` (request counts, latency percentiles, circuit breaker
//! state, retry counts). This is an ambient counter set queried by
//! `query_core_status`/`get_event_statistics` -- it never opens a network
//! listener; exposing it over HTTP is the excluded "health/metrics
//! endpoint" collaborator named in scope.

// ACCEPTABLE: mutex poisoning means a prior holder panicked mid-update;
// there is no meaningful recovery, so we propagate the panic.
#![allow(clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct ToolCallMetrics {
    pub total: u64,
    pub success: u64,
    pub failure: u64,
}

#[derive(Debug, Clone, Default)]
pub struct LatencyMetrics {
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

#[derive(Debug, Clone, Default)]
pub struct BatchMetrics {
    pub total_batches: u64,
    pub avg_batch_size: f64,
    pub max_batch_size: usize,
}

#[derive(Debug, Clone)]
pub struct ConnectionMetrics {
    pub state: String,
    pub reconnect_count: u64,
    pub circuit_open_count: u64,
}

impl Default for ConnectionMetrics {
    fn default() -> Self {
        Self {
            state: "disconnected".to_string(),
            reconnect_count: 0,
            circuit_open_count: 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetryMetrics {
    pub total_retries: u64,
    pub successful_retries: u64,
    pub failed_retries: u64,
}

#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub tool_calls: ToolCallMetrics,
    pub latency: LatencyMetrics,
    pub batch: BatchMetrics,
    pub connection: ConnectionMetrics,
    pub retry: RetryMetrics,
}

/// Thread-safe counter set; every field is behind its own lock so a
/// latency sample and a tool-call count never contend.
pub struct MetricsCollector {
    tool_calls: Mutex<ToolCallMetrics>,
    latencies: Mutex<VecDeque<u64>>,
    batch_sizes: Mutex<VecDeque<usize>>,
    connection: Mutex<ConnectionMetrics>,
    retry: Mutex<RetryMetrics>,
    max_samples: usize,
}

impl MetricsCollector {
    pub fn new(max_samples: usize) -> Self {
        Self {
            tool_calls: Mutex::new(ToolCallMetrics::default()),
            latencies: Mutex::new(VecDeque::with_capacity(max_samples)),
            batch_sizes: Mutex::new(VecDeque::with_capacity(max_samples)),
            connection: Mutex::new(ConnectionMetrics::default()),
            retry: Mutex::new(RetryMetrics::default()),
            max_samples,
        }
    }

    pub fn record_tool_call(&self, success: bool) {
        let mut m = self.tool_calls.lock().expect("metrics mutex poisoned");
        m.total += 1;
        if success {
            m.success += 1;
        } else {
            m.failure += 1;
        }
    }

    pub fn record_latency(&self, latency_ms: u64) {
        let mut latencies = self.latencies.lock().expect("metrics mutex poisoned");
        latencies.push_back(latency_ms);
        if latencies.len() > self.max_samples {
            latencies.pop_front();
        }
    }

    pub fn record_batch_size(&self, size: usize) {
        let mut sizes = self.batch_sizes.lock().expect("metrics mutex poisoned");
        sizes.push_back(size);
        if sizes.len() > self.max_samples {
            sizes.pop_front();
        }
    }

    pub fn update_connection(&self, state: &str) {
        self.connection.lock().expect("metrics mutex poisoned").state = state.to_string();
    }

    pub fn record_reconnect(&self) {
        self.connection.lock().expect("metrics mutex poisoned").reconnect_count += 1;
    }

    pub fn record_circuit_open(&self) {
        self.connection.lock().expect("metrics mutex poisoned").circuit_open_count += 1;
    }

    pub fn record_retry(&self, success: bool) {
        let mut retry = self.retry.lock().expect("metrics mutex poisoned");
        retry.total_retries += 1;
        if success {
            retry.successful_retries += 1;
        } else {
            retry.failed_retries += 1;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let tool_calls = self.tool_calls.lock().expect("metrics mutex poisoned").clone();

        let mut latency_vec: Vec<u64> = self.latencies.lock().expect("metrics mutex poisoned").iter().copied().collect();
        latency_vec.sort_unstable();
        let latency = percentiles(&latency_vec);

        let batch_vec: Vec<usize> = self.batch_sizes.lock().expect("metrics mutex poisoned").iter().copied().collect();
        let batch = if batch_vec.is_empty() {
            BatchMetrics::default()
        } else {
            let sum: usize = batch_vec.iter().sum();
            BatchMetrics {
                total_batches: batch_vec.len() as u64,
                avg_batch_size: sum as f64 / batch_vec.len() as f64,
                max_batch_size: *batch_vec.iter().max().unwrap_or(&0),
            }
        };

        let connection = self.connection.lock().expect("metrics mutex poisoned").clone();
        let retry = self.retry.lock().expect("metrics mutex poisoned").clone();

        MetricsSnapshot {
            tool_calls,
            latency,
            batch,
            connection,
            retry,
        }
    }
}

fn percentiles(sorted: &[u64]) -> LatencyMetrics {
    if sorted.is_empty() {
        return LatencyMetrics::default();
    }
    let at = |fraction: f64| -> u64 {
        let idx = ((sorted.len() - 1) as f64 * fraction).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    };
    LatencyMetrics {
        p50_ms: at(0.50),
        p95_ms: at(0.95),
        p99_ms: at(0.99),
    }
}

/// RAII latency sample: records elapsed time into the collector on drop
/// unless `finish` is called explicitly.
pub struct LatencyTimer {
    start: Instant,
    collector: Arc<MetricsCollector>,
}

impl LatencyTimer {
    pub fn start(collector: Arc<MetricsCollector>) -> Self {
        Self {
            start: Instant::now(),
            collector,
        }
    }

    pub fn finish(self) -> Duration {
        let elapsed = self.start.elapsed();
        self.collector.record_latency(elapsed.as_millis() as u64);
        elapsed
    }
}
