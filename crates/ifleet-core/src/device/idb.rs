use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::config::CompanionConfig;
use crate::device::automation::DeviceAutomation;
use crate::device::{AppInfo, DeviceId, DeviceInfo, Frame, Point, UiElement};
use crate::{FleetError, Result};

/// Device handle backed by the idb companion CLI.
///
/// Each call spawns one short-lived `idb` process scoped to the device via
/// `--udid`; nothing is shared between calls.
pub struct IdbClient {
    device: DeviceId,
    idb_path: String,
    timeout: Duration,
}

impl IdbClient {
    pub fn new(device: DeviceId, config: &CompanionConfig) -> Self {
        Self {
            device,
            idb_path: config.idb_path.clone(),
            timeout: Duration::from_secs(config.command_timeout_secs),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<Vec<u8>> {
        let mut cmd = Command::new(&self.idb_path);
        cmd.args(args)
            .arg("--udid")
            .arg(self.device.as_str())
            .kill_on_drop(true);
        debug!(device = self.device.short(), command = ?args, "running idb");

        let operation = format!("idb {}", args.first().copied().unwrap_or_default());
        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| FleetError::timeout(&operation, self.timeout.as_secs()))?
            .map_err(|e| {
                FleetError::connection(
                    self.device.as_str(),
                    format!("failed to spawn {}: {e}", self.idb_path),
                )
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&self.device, stderr.trim()));
        }
        Ok(output.stdout)
    }

    async fn run_utf8(&self, args: &[&str]) -> Result<String> {
        let stdout = self.run(args).await?;
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }
}

/// Companion-unreachable failures are retryable, on-device failures are not.
fn classify_failure(device: &DeviceId, stderr: &str) -> FleetError {
    let lowered = stderr.to_lowercase();
    let unreachable = lowered.contains("connection refused")
        || lowered.contains("companion not running")
        || lowered.contains("could not connect")
        || lowered.contains("no companion");
    if unreachable {
        FleetError::connection(device.as_str(), stderr.to_string())
    } else {
        FleetError::Command(format!("device {}: {stderr}", device.short()))
    }
}

fn parse_app_lines(raw: &str) -> Vec<AppInfo> {
    // idb list-apps --json emits one JSON object per line
    raw.lines()
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line.trim()).ok())
        .filter_map(|v| {
            let bundle_id = v.get("bundle_id")?.as_str()?.to_string();
            let name = v
                .get("name")
                .and_then(|n| n.as_str())
                .unwrap_or(&bundle_id)
                .to_string();
            Some(AppInfo { bundle_id, name })
        })
        .collect()
}

fn parse_elements(raw: &str) -> Result<Vec<UiElement>> {
    let values: Vec<serde_json::Value> = serde_json::from_str(raw)?;
    Ok(values
        .into_iter()
        .map(|v| {
            let kind = v
                .get("type")
                .and_then(|t| t.as_str())
                .unwrap_or("Unknown")
                .to_string();
            let label = v
                .get("AXLabel")
                .and_then(|l| l.as_str())
                .filter(|l| !l.is_empty())
                .map(str::to_string);
            let frame = v.get("frame").and_then(|f| {
                Some(Frame {
                    x: f.get("x")?.as_f64()?,
                    y: f.get("y")?.as_f64()?,
                    width: f.get("width")?.as_f64()?,
                    height: f.get("height")?.as_f64()?,
                })
            });
            UiElement { kind, label, frame }
        })
        .collect())
}

fn matches_query(element: &UiElement, kind: &str, label: Option<&str>) -> bool {
    if !element.kind.eq_ignore_ascii_case(kind) {
        return false;
    }
    match label {
        Some(wanted) => element
            .label
            .as_deref()
            .is_some_and(|l| l.contains(wanted)),
        None => true,
    }
}

#[async_trait]
impl DeviceAutomation for IdbClient {
    fn device(&self) -> &DeviceId {
        &self.device
    }

    async fn info(&self) -> Result<DeviceInfo> {
        let raw = self.run_utf8(&["describe", "--json"]).await?;
        let value: serde_json::Value = serde_json::from_str(&raw)?;
        match value {
            serde_json::Value::Object(map) => Ok(DeviceInfo::from_json_map(map)),
            _ => Err(FleetError::Command(format!(
                "device {}: describe returned non-object payload",
                self.device.short()
            ))),
        }
    }

    async fn list_apps(&self) -> Result<Vec<AppInfo>> {
        let raw = self.run_utf8(&["list-apps", "--json"]).await?;
        Ok(parse_app_lines(&raw))
    }

    async fn launch_app(&self, bundle_id: &str) -> Result<()> {
        self.run(&["launch", bundle_id]).await?;
        Ok(())
    }

    async fn terminate_app(&self, bundle_id: &str) -> Result<()> {
        self.run(&["terminate", bundle_id]).await?;
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        // idb only writes screenshots to a path, so round-trip through a
        // scratch file.
        let path = std::env::temp_dir().join(format!("ifleet-{}.png", uuid::Uuid::new_v4()));
        let path_str = path.to_string_lossy().into_owned();
        let result = self.run(&["screenshot", &path_str]).await;
        let bytes = match result {
            Ok(_) => tokio::fs::read(&path).await.map_err(FleetError::from),
            Err(e) => Err(e),
        };
        let _ = tokio::fs::remove_file(&path).await;
        bytes
    }

    async fn find_elements(&self, kind: &str, label: Option<&str>) -> Result<Vec<UiElement>> {
        let raw = self.run_utf8(&["ui", "describe-all"]).await?;
        let elements = parse_elements(&raw)?;
        Ok(elements
            .into_iter()
            .filter(|e| matches_query(e, kind, label))
            .collect())
    }

    async fn tap(&self, point: Point) -> Result<()> {
        let (x, y) = (point.x.to_string(), point.y.to_string());
        self.run(&["ui", "tap", &x, &y]).await?;
        Ok(())
    }

    async fn long_press(&self, point: Point, duration: Duration) -> Result<()> {
        let (x, y) = (point.x.to_string(), point.y.to_string());
        let secs = duration.as_secs_f64().to_string();
        self.run(&["ui", "tap", &x, &y, "--duration", &secs]).await?;
        Ok(())
    }

    async fn swipe(&self, from: Point, to: Point, duration: Duration) -> Result<()> {
        let (x1, y1) = (from.x.to_string(), from.y.to_string());
        let (x2, y2) = (to.x.to_string(), to.y.to_string());
        let secs = duration.as_secs_f64().to_string();
        self.run(&["ui", "swipe", &x1, &y1, &x2, &y2, "--duration", &secs])
            .await?;
        Ok(())
    }

    async fn input_text(&self, text: &str) -> Result<()> {
        self.run(&["ui", "text", text]).await?;
        Ok(())
    }

    async fn press_button(&self, button: &str) -> Result<()> {
        self.run(&["ui", "button", button]).await?;
        Ok(())
    }
}
