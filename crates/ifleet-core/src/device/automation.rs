use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::CompanionConfig;
use crate::device::idb::IdbClient;
use crate::device::wda::WdaClient;
use crate::device::{AppInfo, DeviceId, DeviceInfo, Point, UiElement};
use crate::{FleetError, Result};

/// The capability surface a device automation daemon exposes.
///
/// Every method is a single blocking round trip to the companion from the
/// caller's perspective. No timeout or retry is added at this layer; the
/// backend applies the configured per-call timeout and callers compose a
/// [`crate::retry::RetryPolicy`] on top when they want one.
#[async_trait]
pub trait DeviceAutomation: Send + Sync {
    fn device(&self) -> &DeviceId;

    async fn info(&self) -> Result<DeviceInfo>;

    async fn list_apps(&self) -> Result<Vec<AppInfo>>;

    async fn launch_app(&self, bundle_id: &str) -> Result<()>;

    async fn terminate_app(&self, bundle_id: &str) -> Result<()>;

    /// PNG-encoded screen contents.
    async fn screenshot(&self) -> Result<Vec<u8>>;

    async fn find_elements(&self, kind: &str, label: Option<&str>) -> Result<Vec<UiElement>>;

    async fn tap(&self, point: Point) -> Result<()>;

    async fn long_press(&self, point: Point, duration: Duration) -> Result<()>;

    async fn swipe(&self, from: Point, to: Point, duration: Duration) -> Result<()>;

    async fn input_text(&self, text: &str) -> Result<()>;

    /// Press a hardware button by name ("home", "volumeUp", ...).
    async fn press_button(&self, button: &str) -> Result<()>;
}

/// Which automation daemon a device handle talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// WebDriverAgent-style HTTP endpoint.
    Wda,
    /// idb companion driven through its CLI.
    Idb,
}

impl FromStr for Backend {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "wda" => Ok(Backend::Wda),
            "idb" => Ok(Backend::Idb),
            other => Err(FleetError::InvalidConfig(format!(
                "unknown backend '{other}', expected 'wda' or 'idb'"
            ))),
        }
    }
}

/// Build a handle for one device against the selected backend.
///
/// Handles are cheap and are not shared mutable state: each call opens its
/// own connection or companion process.
pub fn connect(
    backend: Backend,
    device: DeviceId,
    config: &CompanionConfig,
) -> Result<Arc<dyn DeviceAutomation>> {
    match backend {
        Backend::Wda => Ok(Arc::new(WdaClient::new(device, config)?)),
        Backend::Idb => Ok(Arc::new(IdbClient::new(device, config))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_parses_case_insensitively() {
        assert_eq!("WDA".parse::<Backend>().unwrap(), Backend::Wda);
        assert_eq!("idb".parse::<Backend>().unwrap(), Backend::Idb);
        assert!("adb".parse::<Backend>().is_err());
    }
}
