use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde_json::{Value, json};
use tracing::debug;

use crate::config::CompanionConfig;
use crate::device::automation::DeviceAutomation;
use crate::device::{AppInfo, DeviceId, DeviceInfo, Frame, Point, UiElement};
use crate::{FleetError, Result};

/// Device handle backed by a WebDriverAgent-style HTTP endpoint.
///
/// A session is created lazily on the first call that needs one and reused
/// afterwards. Transport failures surface as retryable errors via the
/// reqwest conversion; errors reported by the agent itself are command
/// errors.
pub struct WdaClient {
    device: DeviceId,
    base_url: String,
    http: reqwest::Client,
    session: tokio::sync::Mutex<Option<String>>,
}

impl WdaClient {
    pub fn new(device: DeviceId, config: &CompanionConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.command_timeout_secs))
            .build()?;
        Ok(Self {
            device,
            base_url: config.base_url(),
            http,
            session: tokio::sync::Mutex::new(None),
        })
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let url = format!("{}{path}", self.base_url);
        debug!(device = self.device.short(), %url, "wda get");
        let response = self.http.get(&url).send().await?;
        self.unwrap_envelope(response).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let url = format!("{}{path}", self.base_url);
        debug!(device = self.device.short(), %url, "wda post");
        let response = self.http.post(&url).json(&body).send().await?;
        self.unwrap_envelope(response).await
    }

    /// WDA wraps every payload in `{"value": ..., "sessionId": ...}` and
    /// reports agent-side failures as `value.error`.
    async fn unwrap_envelope(&self, response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        let body: Value = response.json().await?;
        let value = body.get("value").cloned().unwrap_or(Value::Null);
        let agent_error = value.get("error").and_then(|e| e.as_str());
        if !status.is_success() || agent_error.is_some() {
            let message = value
                .get("message")
                .and_then(|m| m.as_str())
                .or(agent_error)
                .unwrap_or("unknown agent error");
            return Err(FleetError::Command(format!(
                "device {}: {message}",
                self.device.short()
            )));
        }
        Ok(body)
    }

    async fn ensure_session(&self) -> Result<String> {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_ref() {
            return Ok(session.clone());
        }
        let body = self
            .post("/session", json!({"capabilities": {"alwaysMatch": {}}}))
            .await?;
        let session = body
            .get("sessionId")
            .or_else(|| body.get("value").and_then(|v| v.get("sessionId")))
            .and_then(|s| s.as_str())
            .ok_or_else(|| {
                FleetError::connection(self.device.as_str(), "agent returned no session id")
            })?
            .to_string();
        debug!(device = self.device.short(), session = %session, "created wda session");
        *guard = Some(session.clone());
        Ok(session)
    }
}

fn value_field(value: &Value) -> &Value {
    value.get("value").unwrap_or(&Value::Null)
}

#[async_trait]
impl DeviceAutomation for WdaClient {
    fn device(&self) -> &DeviceId {
        &self.device
    }

    async fn info(&self) -> Result<DeviceInfo> {
        let session = self.ensure_session().await?;
        let raw = self.get(&format!("/session/{session}/wda/device/info")).await?;

        let mut info = DeviceInfo::new();
        if let Some(map) = value_field(&raw).as_object() {
            for (key, value) in map {
                info.insert(key.clone(), value.clone());
            }
            if let Some(name) = map.get("name").and_then(|v| v.as_str()) {
                info.insert("DeviceName", name);
            }
            if let Some(model) = map.get("model").and_then(|v| v.as_str()) {
                info.insert("ProductType", model);
            }
        }

        // Battery arrives from its own endpoint as a 0..1 fraction.
        if let Ok(raw) = self.get(&format!("/session/{session}/wda/batteryInfo")).await {
            let battery = value_field(&raw);
            if let Some(level) = battery.get("level").and_then(|l| l.as_f64()) {
                if level >= 0.0 {
                    info.insert("BatteryCurrentCapacity", (level * 100.0).round() as i64);
                }
            }
            if let Some(state) = battery.get("state").and_then(|s| s.as_i64()) {
                // UIDeviceBatteryState: 2 = charging, 3 = full
                info.insert("BatteryIsCharging", state == 2);
            }
        }
        Ok(info)
    }

    async fn list_apps(&self) -> Result<Vec<AppInfo>> {
        let session = self.ensure_session().await?;
        let raw = self.get(&format!("/session/{session}/wda/apps/list")).await?;
        let apps = value_field(&raw)
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| {
                        let bundle_id = entry.get("bundleId")?.as_str()?.to_string();
                        let name = entry
                            .get("name")
                            .and_then(|n| n.as_str())
                            .unwrap_or(&bundle_id)
                            .to_string();
                        Some(AppInfo { bundle_id, name })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(apps)
    }

    async fn launch_app(&self, bundle_id: &str) -> Result<()> {
        let session = self.ensure_session().await?;
        self.post(
            &format!("/session/{session}/wda/apps/launch"),
            json!({"bundleId": bundle_id}),
        )
        .await?;
        Ok(())
    }

    async fn terminate_app(&self, bundle_id: &str) -> Result<()> {
        let session = self.ensure_session().await?;
        self.post(
            &format!("/session/{session}/wda/apps/terminate"),
            json!({"bundleId": bundle_id}),
        )
        .await?;
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        let raw = self.get("/screenshot").await?;
        let encoded = value_field(&raw).as_str().ok_or_else(|| {
            FleetError::Command(format!(
                "device {}: screenshot payload was not a string",
                self.device.short()
            ))
        })?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| FleetError::Command(format!("invalid screenshot encoding: {e}")))
    }

    async fn find_elements(&self, kind: &str, label: Option<&str>) -> Result<Vec<UiElement>> {
        let session = self.ensure_session().await?;
        let predicate = match label {
            Some(label) => format!("type == 'XCUIElementType{kind}' AND label CONTAINS '{label}'"),
            None => format!("type == 'XCUIElementType{kind}'"),
        };
        let raw = self
            .post(
                &format!("/session/{session}/elements"),
                json!({"using": "predicate string", "value": predicate}),
            )
            .await?;

        let ids: Vec<String> = value_field(&raw)
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| {
                        entry
                            .get("ELEMENT")
                            .or_else(|| entry.get("element-6066-11e4-a52e-4f735466cecf"))
                            .and_then(|id| id.as_str())
                            .map(str::to_string)
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut elements = Vec::with_capacity(ids.len());
        for id in ids {
            let frame = self
                .get(&format!("/session/{session}/element/{id}/rect"))
                .await
                .ok()
                .and_then(|raw| serde_json::from_value::<Frame>(value_field(&raw).clone()).ok());
            elements.push(UiElement {
                kind: kind.to_string(),
                label: label.map(str::to_string),
                frame,
            });
        }
        Ok(elements)
    }

    async fn tap(&self, point: Point) -> Result<()> {
        let session = self.ensure_session().await?;
        self.post(
            &format!("/session/{session}/wda/tap"),
            json!({"x": point.x, "y": point.y}),
        )
        .await?;
        Ok(())
    }

    async fn long_press(&self, point: Point, duration: Duration) -> Result<()> {
        let session = self.ensure_session().await?;
        self.post(
            &format!("/session/{session}/wda/touchAndHold"),
            json!({"x": point.x, "y": point.y, "duration": duration.as_secs_f64()}),
        )
        .await?;
        Ok(())
    }

    async fn swipe(&self, from: Point, to: Point, duration: Duration) -> Result<()> {
        let session = self.ensure_session().await?;
        self.post(
            &format!("/session/{session}/wda/dragfromtoforduration"),
            json!({
                "fromX": from.x,
                "fromY": from.y,
                "toX": to.x,
                "toY": to.y,
                "duration": duration.as_secs_f64(),
            }),
        )
        .await?;
        Ok(())
    }

    async fn input_text(&self, text: &str) -> Result<()> {
        let session = self.ensure_session().await?;
        self.post(&format!("/session/{session}/wda/keys"), json!({"value": [text]}))
            .await?;
        Ok(())
    }

    async fn press_button(&self, button: &str) -> Result<()> {
        let session = self.ensure_session().await?;
        self.post(
            &format!("/session/{session}/wda/pressButton"),
            json!({"name": button}),
        )
        .await?;
        Ok(())
    }
}
