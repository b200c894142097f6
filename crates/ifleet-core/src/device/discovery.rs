use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use crate::device::DeviceId;
use crate::{FleetError, Result};

/// Source of the currently reachable device set.
#[async_trait]
pub trait DeviceDiscovery: Send + Sync {
    async fn list_devices(&self) -> Result<Vec<DeviceId>>;
}

/// Physical devices over usbmuxd, via `idevice_id -l` (one UDID per line).
pub struct UsbmuxDiscovery;

#[async_trait]
impl DeviceDiscovery for UsbmuxDiscovery {
    async fn list_devices(&self) -> Result<Vec<DeviceId>> {
        let output = Command::new("idevice_id").arg("-l").output().await.map_err(|_| {
            FleetError::Command(
                "idevice_id not found. Please install libimobiledevice".to_string(),
            )
        })?;
        if !output.status.success() {
            return Err(FleetError::Command(format!(
                "idevice_id failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut devices = Vec::new();
        for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match DeviceId::new(line) {
                Ok(id) => devices.push(id),
                Err(_) => warn!(line, "skipping unparseable idevice_id entry"),
            }
        }
        info!(count = devices.len(), "discovered usb devices");
        Ok(devices)
    }
}

/// Simulators via `xcrun simctl list devices -j`.
pub struct SimctlDiscovery {
    pub booted_only: bool,
}

impl SimctlDiscovery {
    pub fn new() -> Self {
        Self { booted_only: true }
    }
}

impl Default for SimctlDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceDiscovery for SimctlDiscovery {
    async fn list_devices(&self) -> Result<Vec<DeviceId>> {
        let output = Command::new("xcrun")
            .args(["simctl", "list", "devices", "-j"])
            .output()
            .await
            .map_err(|e| FleetError::Command(format!("failed to list simulators: {e}")))?;
        if !output.status.success() {
            return Err(FleetError::Command(format!(
                "simctl failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let parsed: serde_json::Value = serde_json::from_slice(&output.stdout)?;
        let devices = parse_simctl_devices(&parsed, self.booted_only);
        info!(count = devices.len(), booted_only = self.booted_only, "discovered simulators");
        Ok(devices)
    }
}

fn parse_simctl_devices(parsed: &serde_json::Value, booted_only: bool) -> Vec<DeviceId> {
    let mut devices = Vec::new();
    let Some(by_runtime) = parsed.get("devices").and_then(|d| d.as_object()) else {
        return devices;
    };
    for device_list in by_runtime.values() {
        let Some(entries) = device_list.as_array() else {
            continue;
        };
        for entry in entries {
            let available = entry
                .get("isAvailable")
                .and_then(|a| a.as_bool())
                .unwrap_or(true);
            let booted = entry.get("state").and_then(|s| s.as_str()) == Some("Booted");
            if !available || (booted_only && !booted) {
                continue;
            }
            if let Some(udid) = entry.get("udid").and_then(|u| u.as_str()) {
                if let Ok(id) = DeviceId::new(udid) {
                    devices.push(id);
                }
            }
        }
    }
    devices
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> serde_json::Value {
        json!({
            "devices": {
                "com.apple.CoreSimulator.SimRuntime.iOS-17-4": [
                    {"udid": "B7A9C2D1-4E6F-4A2B-9C8D-1F2E3D4C5B6A", "state": "Booted", "isAvailable": true},
                    {"udid": "C8B0D3E2-5F70-4B3C-AD9E-203F4E5D6C7B", "state": "Shutdown", "isAvailable": true}
                ],
                "com.apple.CoreSimulator.SimRuntime.iOS-16-0": [
                    {"udid": "D9C1E4F3-6081-4C4D-BE0F-314A5F6E7D8C", "state": "Booted", "isAvailable": false}
                ]
            }
        })
    }

    #[test]
    fn booted_only_filters_shutdown_and_unavailable() {
        let devices = parse_simctl_devices(&sample(), true);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].as_str(), "B7A9C2D1-4E6F-4A2B-9C8D-1F2E3D4C5B6A");
    }

    #[test]
    fn all_states_still_excludes_unavailable() {
        let devices = parse_simctl_devices(&sample(), false);
        assert_eq!(devices.len(), 2);
    }

    #[test]
    fn missing_devices_key_yields_empty() {
        assert!(parse_simctl_devices(&json!({}), true).is_empty());
    }
}
