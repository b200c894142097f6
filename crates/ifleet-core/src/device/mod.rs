use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{FleetError, Result};

pub mod automation;
pub mod discovery;
pub mod idb;
pub mod registry;
pub mod wda;

pub use automation::{Backend, DeviceAutomation, connect};
pub use discovery::{DeviceDiscovery, SimctlDiscovery, UsbmuxDiscovery};
pub use registry::DeviceRegistry;

/// Opaque unique identifier of a physical device or simulator (UDID).
///
/// Immutable once constructed. Physical UDIDs are 40-char hex strings or
/// `00008020-...` style; simulators use lowercase UUIDs. We only reject
/// obvious garbage here so either form passes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(FleetError::InvalidConfig("device id must not be empty".into()));
        }
        if !raw.chars().all(|c| c.is_ascii_hexdigit() || c == '-') {
            return Err(FleetError::InvalidConfig(format!(
                "device id contains invalid characters: {raw}"
            )));
        }
        Ok(DeviceId(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, used in log fields and screenshot names.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(8);
        &self.0[..end]
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceId {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self> {
        DeviceId::new(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    Connected,
    Disconnected,
    Unknown,
}

/// Key/value bag of device properties as reported by the companion
/// (`DeviceName`, `ProductType`, `ProductVersion`, `BatteryCurrentCapacity`, ...).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceInfo {
    values: BTreeMap<String, serde_json::Value>,
}

impl DeviceInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `Key: Value` lines as printed by ideviceinfo-style tools.
    pub fn parse_key_values(output: &str) -> Self {
        let mut values = BTreeMap::new();
        for line in output.lines() {
            if let Some((key, value)) = line.split_once(':') {
                let key = key.trim();
                let value = value.trim();
                if !key.is_empty() && !value.is_empty() {
                    values.insert(key.to_string(), serde_json::Value::String(value.to_string()));
                }
            }
        }
        Self { values }
    }

    pub fn from_json_map(map: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            values: map.into_iter().collect(),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(|v| v.as_str())
    }

    pub fn name(&self) -> &str {
        self.get_str("DeviceName").unwrap_or("Unknown Device")
    }

    pub fn product_type(&self) -> &str {
        self.get_str("ProductType").unwrap_or("Unknown Model")
    }

    pub fn product_version(&self) -> &str {
        self.get_str("ProductVersion").unwrap_or("Unknown Version")
    }

    /// Battery percentage, -1 when unknown. Tools disagree on the key and
    /// on whether it is a number or a string, so both are accepted.
    pub fn battery_level(&self) -> i32 {
        for key in ["BatteryCurrentCapacity", "BatteryLevel"] {
            if let Some(v) = self.values.get(key) {
                if let Some(n) = v.as_i64() {
                    return n as i32;
                }
                if let Some(parsed) = v.as_str().and_then(|s| s.parse::<i32>().ok()) {
                    return parsed;
                }
            }
        }
        -1
    }

    pub fn battery_charging(&self) -> bool {
        match self.values.get("BatteryIsCharging") {
            Some(serde_json::Value::Bool(b)) => *b,
            Some(serde_json::Value::String(s)) => matches!(s.as_str(), "true" | "1" | "yes"),
            _ => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.values.iter()
    }
}

/// Screen coordinate in points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppInfo {
    pub bundle_id: String,
    pub name: String,
}

/// An accessibility element reported by the automation daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiElement {
    pub kind: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub frame: Option<Frame>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Frame {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Frame {
    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}
