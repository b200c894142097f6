use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::Result;
use crate::batch::BatchRecord;
use crate::device::DeviceId;

/// Aggregate view of one batch run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub operation: String,
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub success_rate: f64,
    pub total_duration_ms: u64,
    pub avg_duration_ms: u64,
    pub failed_devices: Vec<DeviceId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordDetail {
    pub device: DeviceId,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Summary plus per-device detail, ready to serialize.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub summary: BatchSummary,
    pub records: Vec<RecordDetail>,
}

impl BatchReport {
    pub fn from_records<T: Serialize>(operation: &str, records: &[BatchRecord<T>]) -> Self {
        let total = records.len();
        let succeeded = records.iter().filter(|r| r.success).count();
        let failed = total - succeeded;
        let success_rate = if total > 0 {
            (succeeded as f64 / total as f64 * 10_000.0).round() / 100.0
        } else {
            0.0
        };
        let total_duration_ms: u64 = records.iter().map(|r| r.duration.as_millis() as u64).sum();
        let avg_duration_ms = if total > 0 {
            total_duration_ms / total as u64
        } else {
            0
        };

        let summary = BatchSummary {
            operation: operation.to_string(),
            run_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            total,
            succeeded,
            failed,
            success_rate,
            total_duration_ms,
            avg_duration_ms,
            failed_devices: records
                .iter()
                .filter(|r| !r.success)
                .map(|r| r.device.clone())
                .collect(),
        };

        let records = records
            .iter()
            .map(|r| RecordDetail {
                device: r.device.clone(),
                success: r.success,
                value: r
                    .value
                    .as_ref()
                    .and_then(|v| serde_json::to_value(v).ok())
                    .filter(|v| !v.is_null()),
                error: r.error.clone(),
                duration_ms: r.duration.as_millis() as u64,
            })
            .collect();

        Self { summary, records }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        info!(path = %path.display(), operation = %self.summary.operation, "saved batch report");
        Ok(())
    }
}
