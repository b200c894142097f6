use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use crate::config::ExecutorConfig;
use crate::device::DeviceId;
use crate::{FleetError, Result};

pub mod ops;
pub mod report;

pub use ops::FleetOps;
pub use report::{BatchReport, BatchSummary};

/// Outcome of one operation on one device. Immutable once created; a batch
/// hands the full set back to the caller.
#[derive(Debug, Clone)]
pub struct BatchRecord<T> {
    pub device: DeviceId,
    pub success: bool,
    pub value: Option<T>,
    pub error: Option<String>,
    pub duration: Duration,
}

impl<T> BatchRecord<T> {
    fn ok(device: DeviceId, value: T, duration: Duration) -> Self {
        Self {
            device,
            success: true,
            value: Some(value),
            error: None,
            duration,
        }
    }

    fn failed(device: DeviceId, error: String, duration: Duration) -> Self {
        Self {
            device,
            success: false,
            value: None,
            error: Some(error),
            duration,
        }
    }
}

/// Maps one operation over many devices with bounded concurrency.
///
/// Guarantees: the result has exactly one record per input device, in input
/// order; a failing (or panicking) device never affects the others or
/// aborts the batch. No state outlives a `run` call.
pub struct BatchExecutor {
    workers: usize,
}

impl BatchExecutor {
    pub fn new(workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(FleetError::InvalidConfig(
                "batch executor needs at least one worker".into(),
            ));
        }
        Ok(Self { workers })
    }

    pub fn from_config(config: &ExecutorConfig) -> Result<Self> {
        Self::new(config.max_workers)
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        devices: &[DeviceId],
        op: F,
    ) -> Vec<BatchRecord<T>>
    where
        F: Fn(DeviceId) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if devices.is_empty() {
            return Vec::new();
        }

        info!(
            operation,
            devices = devices.len(),
            workers = self.workers,
            "starting batch"
        );
        let started = Instant::now();

        // buffered() polls at most `workers` futures at a time and yields
        // results in input order, which is exactly the batch contract.
        let records: Vec<BatchRecord<T>> = stream::iter(devices.iter().cloned())
            .map(|device| {
                let call = AssertUnwindSafe(op(device.clone())).catch_unwind();
                async move {
                    let begun = Instant::now();
                    match call.await {
                        Ok(Ok(value)) => BatchRecord::ok(device, value, begun.elapsed()),
                        Ok(Err(e)) => {
                            warn!(device = device.short(), error = %e, "batch operation failed");
                            BatchRecord::failed(device, e.to_string(), begun.elapsed())
                        }
                        Err(panic) => {
                            let message = panic
                                .downcast_ref::<&str>()
                                .map(|s| (*s).to_string())
                                .or_else(|| panic.downcast_ref::<String>().cloned())
                                .unwrap_or_else(|| "unknown panic".to_string());
                            warn!(device = device.short(), panic = %message, "batch operation panicked");
                            BatchRecord::failed(
                                device,
                                format!("panic: {message}"),
                                begun.elapsed(),
                            )
                        }
                    }
                }
            })
            .buffered(self.workers)
            .collect()
            .await;

        let succeeded = records.iter().filter(|r| r.success).count();
        info!(
            operation,
            succeeded,
            total = records.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch complete"
        );
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_workers_is_rejected() {
        assert!(matches!(
            BatchExecutor::new(0),
            Err(FleetError::InvalidConfig(_))
        ));
        assert_eq!(BatchExecutor::new(2).unwrap().workers(), 2);
    }
}
