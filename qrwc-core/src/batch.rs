//! Transactional batch executor, grounded on the collector/
//! processor/manager shape of the grounding crate's `batch.rs` but replacing
//! generic request coalescing with snapshot-then-write-then-
//! rollback semantics. The grounding crate's second, simpler batching
//! abstraction is not carried forward.

use crate::error::{BridgeError, BridgeResult};
use crate::model::{ControlValue, ControlWriteOutcome, ExecutionResult};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// What the batch executor needs from the QRWC Adapter (component C); kept
/// as a narrow trait so tests can substitute a fake Core without standing
/// up a real transport.
#[async_trait]
pub trait ControlWriter: Send + Sync {
    async fn get_value(&self, name: &str) -> BridgeResult<ControlValue>;
    async fn set_value(&self, name: &str, value: ControlValue, ramp: Option<f64>) -> BridgeResult<()>;
}

#[derive(Debug, Clone)]
pub struct ControlWrite {
    pub component: String,
    pub name: String,
    pub value: ControlValue,
    pub ramp: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub rollback_on_failure: bool,
    pub continue_on_error: bool,
    pub max_concurrent_changes: usize,
    pub timeout_ms: u64,
    pub validate_before_execution: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            rollback_on_failure: true,
            continue_on_error: false,
            max_concurrent_changes: 10,
            timeout_ms: 30_000,
            validate_before_execution: true,
        }
    }
}

pub struct BatchExecutor {
    writer: Arc<dyn ControlWriter>,
}

impl BatchExecutor {
    pub fn new(writer: Arc<dyn ControlWriter>) -> Self {
        Self { writer }
    }

    fn validate(writes: &[ControlWrite]) -> BridgeResult<()> {
        for write in writes {
            if write.name.is_empty() {
                return Err(BridgeError::Validation(
                    "control name must not be empty".into(),
                ));
            }
        }
        Ok(())
    }

    /// Runs the five-step algorithm from the spec: validate, snapshot +
    /// set per control under a permit, stop-on-failure, best-effort
    /// rollback, then the aggregated result.
    pub async fn execute(
        &self,
        writes: Vec<ControlWrite>,
        options: BatchOptions,
        cancel: CancellationToken,
    ) -> BridgeResult<ExecutionResult> {
        let start = Instant::now();
        let total_controls = writes.len();

        if options.validate_before_execution {
            Self::validate(&writes)?;
        }

        let timeout = tokio::time::Duration::from_millis(options.timeout_ms);
        let run = self.run_writes(writes, &options, cancel);

        let results = match tokio::time::timeout(timeout, run).await {
            Ok(results) => results,
            Err(_) => {
                return Err(BridgeError::Timeout(options.timeout_ms));
            }
        };

        let success_count = results.iter().filter(|r| r.success).count();
        let failure_count = results.len() - success_count;

        let mut rollback_performed = false;
        let mut results = results;
        if failure_count > 0 && options.rollback_on_failure {
            rollback_performed = true;
            self.rollback(&mut results).await;
        }

        Ok(ExecutionResult {
            total_controls,
            success_count,
            failure_count,
            results,
            rollback_performed,
            execution_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn run_writes(
        &self,
        writes: Vec<ControlWrite>,
        options: &BatchOptions,
        cancel: CancellationToken,
    ) -> Vec<ControlWriteOutcome> {
        let semaphore = Arc::new(Semaphore::new(options.max_concurrent_changes.max(1)));
        let stop = Arc::new(AtomicBool::new(false));
        let continue_on_error = options.continue_on_error;

        let mut tasks = Vec::with_capacity(writes.len());
        for write in writes {
            if stop.load(Ordering::SeqCst) {
                tasks.push(tokio::spawn(async move {
                    ControlWriteOutcome {
                        component: write.component,
                        name: write.name,
                        success: false,
                        error: Some(BridgeError::Cancelled.to_string()),
                        previous_value: None,
                    }
                }));
                continue;
            }

            let semaphore = Arc::clone(&semaphore);
            let stop = Arc::clone(&stop);
            let cancel = cancel.clone();
            let writer = Arc::clone(&self.writer);

            tasks.push(tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return ControlWriteOutcome {
                            component: write.component,
                            name: write.name,
                            success: false,
                            error: Some(BridgeError::Internal("semaphore closed".into()).to_string()),
                            previous_value: None,
                        };
                    }
                };

                if cancel.is_cancelled() || stop.load(Ordering::SeqCst) {
                    return ControlWriteOutcome {
                        component: write.component,
                        name: write.name,
                        success: false,
                        error: Some(BridgeError::Cancelled.to_string()),
                        previous_value: None,
                    };
                }

                let previous_value = writer.get_value(&write.name).await.ok();
                match writer.set_value(&write.name, write.value.clone(), write.ramp).await {
                    Ok(()) => ControlWriteOutcome {
                        component: write.component,
                        name: write.name,
                        success: true,
                        error: None,
                        previous_value,
                    },
                    Err(e) => {
                        if !continue_on_error {
                            stop.store(true, Ordering::SeqCst);
                        }
                        ControlWriteOutcome {
                            component: write.component,
                            name: write.name,
                            success: false,
                            error: Some(e.to_string()),
                            previous_value,
                        }
                    }
                }
            }));
        }

        let mut outcomes = Vec::with_capacity(tasks.len());
        for task in tasks {
            match task.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(join_err) => outcomes.push(ControlWriteOutcome {
                    component: String::new(),
                    name: String::new(),
                    success: false,
                    error: Some(format!("task panicked: {join_err}")),
                    previous_value: None,
                }),
            }
        }
        outcomes
    }

    /// Writes each successful entry's snapshotted previous value back,
    /// best-effort; rollback failures are recorded but never re-trigger
    /// rollback.
    async fn rollback(&self, results: &mut [ControlWriteOutcome]) {
        for outcome in results.iter_mut() {
            if !outcome.success {
                continue;
            }
            let Some(previous) = outcome.previous_value.clone() else {
                continue;
            };
            if let Err(e) = self.writer.set_value(&outcome.name, previous, None).await {
                tracing::warn!(control = %outcome.name, error = %e, "rollback write failed");
                outcome.error = Some(format!("rollback failed: {e}"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::Mutex as AsyncMutex;

    struct FakeCore {
        values: AsyncMutex<HashMap<String, ControlValue>>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl ControlWriter for FakeCore {
        async fn get_value(&self, name: &str) -> BridgeResult<ControlValue> {
            Ok(self.values.lock().await.get(name).cloned().unwrap_or(ControlValue::Number(0.0)))
        }

        async fn set_value(&self, name: &str, value: ControlValue, _ramp: Option<f64>) -> BridgeResult<()> {
            if self.fail_on.as_deref() == Some(name) {
                return Err(BridgeError::CoreError {
                    code: -1,
                    message: "rejected".into(),
                });
            }
            self.values.lock().await.insert(name.to_string(), value);
            Ok(())
        }
    }

    fn write(name: &str, value: f64) -> ControlWrite {
        ControlWrite {
            component: "Mixer".into(),
            name: name.into(),
            value: ControlValue::Number(value),
            ramp: None,
        }
    }

    #[tokio::test]
    async fn all_succeed_no_rollback() {
        let core = Arc::new(FakeCore {
            values: AsyncMutex::new(HashMap::new()),
            fail_on: None,
        });
        let executor = BatchExecutor::new(core);
        let result = executor.execute(
            vec![write("a.gain", 1.0), write("b.gain", 2.0)],
            BatchOptions::default(),
            CancellationToken::new(),
        ).await.unwrap();

        assert_eq!(result.success_count, 2);
        assert_eq!(result.failure_count, 0);
        assert!(!result.rollback_performed);
    }

    #[tokio::test]
    async fn failure_triggers_rollback_of_successful_writes() {
        let core = Arc::new(FakeCore {
            values: AsyncMutex::new(HashMap::from([("a.gain".to_string(), ControlValue::Number(-10.0))])),
            fail_on: Some("b.gain".to_string()),
        });
        let executor = BatchExecutor::new(Arc::clone(&core));
        let result = executor.execute(
            vec![write("a.gain", 1.0), write("b.gain", 2.0)],
            BatchOptions {
                continue_on_error: true,
                ..BatchOptions::default()
            },
            CancellationToken::new(),
        ).await.unwrap();

        assert_eq!(result.failure_count, 1);
        assert!(result.rollback_performed);
        let restored = core.get_value("a.gain").await.unwrap();
        assert_eq!(restored, ControlValue::Number(-10.0));
    }

    #[tokio::test]
    async fn empty_control_name_rejected_before_execution() {
        let core = Arc::new(FakeCore {
            values: AsyncMutex::new(HashMap::new()),
            fail_on: None,
        });
        let executor = BatchExecutor::new(core);
        let result = executor.execute(
            vec![write("", 1.0)],
            BatchOptions::default(),
            CancellationToken::new(),
        ).await;
        assert!(result.is_err());
    }
}
