use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use crate::batch::{BatchExecutor, BatchRecord};
use crate::cache::{CacheStats, DeviceInfoCache};
use crate::config::{CompanionConfig, FleetConfig};
use crate::device::automation::{Backend, DeviceAutomation, connect};
use crate::device::{DeviceId, DeviceInfo};
use crate::retry::RetryPolicy;
use crate::Result;

/// Device info is cheap to re-read but chatty; cache it briefly.
const INFO_TTL: Duration = Duration::from_secs(30);

/// Condensed per-device status row, the batch `status` payload.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub device: DeviceId,
    pub name: String,
    pub product_type: String,
    pub os_version: String,
    pub battery_level: i32,
}

/// High-level fleet operations: every call fans out over the batch
/// executor, and the per-device composition is explicit: cache lookup
/// wrapping the retry policy wrapping the raw companion call.
pub struct FleetOps {
    backend: Backend,
    companion: CompanionConfig,
    executor: BatchExecutor,
    retry: RetryPolicy,
    info_cache: DeviceInfoCache,
}

impl FleetOps {
    pub fn new(backend: Backend, config: &FleetConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            backend,
            companion: config.companion.clone(),
            executor: BatchExecutor::from_config(&config.executor)?,
            retry: RetryPolicy::new(
                config.companion.retry_count,
                Duration::from_secs_f64(config.companion.retry_interval_secs),
            ),
            info_cache: DeviceInfoCache::new(INFO_TTL),
        })
    }

    pub fn client(&self, device: &DeviceId) -> Result<Arc<dyn DeviceAutomation>> {
        connect(self.backend, device.clone(), &self.companion)
    }

    /// Cached device info; on a cold key the fetch goes through the retry
    /// policy before it hits the companion.
    pub async fn device_info(&self, device: &DeviceId) -> Result<DeviceInfo> {
        self.info_cache
            .get_or_fetch(device, "info", || async move {
                let client = self.client(device)?;
                self.retry
                    .run("info", || {
                        let client = client.clone();
                        async move { client.info().await }
                    })
                    .await
            })
            .await
    }

    /// Drop cached state for a device, forcing the next read to hit it.
    pub fn invalidate_info(&self, device: &DeviceId) {
        self.info_cache.invalidate_device(device);
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.info_cache.stats()
    }

    pub async fn batch_info(&self, devices: &[DeviceId]) -> Vec<BatchRecord<DeviceInfo>> {
        self.executor
            .run("device_info", devices, |device| async move {
                self.device_info(&device).await
            })
            .await
    }

    pub async fn batch_status(&self, devices: &[DeviceId]) -> Vec<BatchRecord<DeviceStatus>> {
        self.executor
            .run("device_status", devices, |device| async move {
                let info = self.device_info(&device).await?;
                Ok(DeviceStatus {
                    name: info.name().to_string(),
                    product_type: info.product_type().to_string(),
                    os_version: info.product_version().to_string(),
                    battery_level: info.battery_level(),
                    device,
                })
            })
            .await
    }

    /// Screenshot every device into `out_dir` as `<udid8>_<timestamp>.png`.
    pub async fn batch_screenshot(
        &self,
        devices: &[DeviceId],
        out_dir: &Path,
    ) -> Result<Vec<BatchRecord<PathBuf>>> {
        tokio::fs::create_dir_all(out_dir).await?;
        let stamp = Utc::now().format("%Y%m%dT%H%M%S").to_string();
        let stamp = &stamp;

        Ok(self
            .executor
            .run("screenshot", devices, |device| async move {
                let client = self.client(&device)?;
                let bytes = self
                    .retry
                    .run("screenshot", || {
                        let client = client.clone();
                        async move { client.screenshot().await }
                    })
                    .await?;
                let path = out_dir.join(format!("{}_{stamp}.png", device.short()));
                tokio::fs::write(&path, &bytes).await?;
                Ok(path)
            })
            .await)
    }

    pub async fn batch_launch(
        &self,
        devices: &[DeviceId],
        bundle_id: &str,
    ) -> Vec<BatchRecord<()>> {
        self.executor
            .run("launch_app", devices, |device| async move {
                let client = self.client(&device)?;
                self.retry
                    .run("launch_app", || {
                        let client = client.clone();
                        async move { client.launch_app(bundle_id).await }
                    })
                    .await
            })
            .await
    }

    pub async fn batch_terminate(
        &self,
        devices: &[DeviceId],
        bundle_id: &str,
    ) -> Vec<BatchRecord<()>> {
        self.executor
            .run("terminate_app", devices, |device| async move {
                let client = self.client(&device)?;
                self.retry
                    .run("terminate_app", || {
                        let client = client.clone();
                        async move { client.terminate_app(bundle_id).await }
                    })
                    .await
            })
            .await
    }
}
