use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::{CompanionConfig, MonitorSettings};
use crate::device::automation::{Backend, connect};
use crate::device::{DeviceId, DeviceState};
use crate::{FleetError, Result};

/// Latest known readings for one device. Only the newest snapshot per
/// device is retained.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub device: DeviceId,
    pub timestamp: DateTime<Utc>,
    pub state: DeviceState,
    /// Percentage, -1 when unknown.
    pub battery_level: i32,
    pub battery_charging: bool,
    pub memory_used_percent: f64,
    pub cpu_percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thermal_state: Option<String>,
}

impl MetricsSnapshot {
    pub fn disconnected(device: DeviceId) -> Self {
        Self {
            device,
            timestamp: Utc::now(),
            state: DeviceState::Disconnected,
            battery_level: -1,
            battery_charging: false,
            memory_used_percent: 0.0,
            cpu_percent: 0.0,
            thermal_state: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => f.write_str("info"),
            Severity::Warning => f.write_str("warning"),
            Severity::Critical => f.write_str("critical"),
        }
    }
}

/// A stateless threshold check, evaluated against every snapshot.
#[derive(Clone)]
pub struct AlertRule {
    name: String,
    severity: Severity,
    predicate: Arc<dyn Fn(&MetricsSnapshot) -> bool + Send + Sync>,
}

impl AlertRule {
    pub fn new(
        name: impl Into<String>,
        severity: Severity,
        predicate: impl Fn(&MetricsSnapshot) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            severity,
            predicate: Arc::new(predicate),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }
}

impl std::fmt::Debug for AlertRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertRule")
            .field("name", &self.name)
            .field("severity", &self.severity)
            .finish()
    }
}

pub fn low_battery(threshold: i32) -> AlertRule {
    AlertRule::new("low_battery", Severity::Warning, move |snapshot| {
        snapshot.battery_level >= 0 && snapshot.battery_level < threshold
    })
}

pub fn high_memory(threshold: f64) -> AlertRule {
    AlertRule::new("high_memory", Severity::Warning, move |snapshot| {
        snapshot.memory_used_percent > threshold
    })
}

pub fn device_disconnected() -> AlertRule {
    AlertRule::new("device_disconnected", Severity::Critical, |snapshot| {
        snapshot.state == DeviceState::Disconnected
    })
}

pub type AlertCallback = Arc<dyn Fn(&str, Severity, &MetricsSnapshot) + Send + Sync>;

/// Where snapshots come from. Production polls the automation backend;
/// tests inject their own.
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    async fn snapshot(&self, device: &DeviceId) -> Result<MetricsSnapshot>;
}

/// Polls `info()` through a fresh backend handle per snapshot. An
/// unreachable device yields a disconnected snapshot rather than an error
/// so disconnection rules can fire on it.
pub struct AutomationMetricsProvider {
    backend: Backend,
    companion: CompanionConfig,
}

impl AutomationMetricsProvider {
    pub fn new(backend: Backend, companion: CompanionConfig) -> Self {
        Self { backend, companion }
    }
}

fn numeric_field(info: &crate::device::DeviceInfo, key: &str) -> f64 {
    match info.get(key) {
        Some(value) => value
            .as_f64()
            .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
            .unwrap_or(0.0),
        None => 0.0,
    }
}

#[async_trait]
impl MetricsProvider for AutomationMetricsProvider {
    async fn snapshot(&self, device: &DeviceId) -> Result<MetricsSnapshot> {
        let client = connect(self.backend, device.clone(), &self.companion)?;
        match client.info().await {
            Ok(info) => Ok(MetricsSnapshot {
                device: device.clone(),
                timestamp: Utc::now(),
                state: DeviceState::Connected,
                battery_level: info.battery_level(),
                battery_charging: info.battery_charging(),
                memory_used_percent: numeric_field(&info, "MemoryUsage"),
                cpu_percent: numeric_field(&info, "CPUUsage"),
                thermal_state: info.get_str("ThermalState").map(str::to_string),
            }),
            Err(e) if e.is_retryable() => {
                debug!(device = device.short(), error = %e, "device unreachable");
                Ok(MetricsSnapshot::disconnected(device.clone()))
            }
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub interval: Duration,
    /// Total runtime before the loop stops on its own; `None` runs until
    /// stopped.
    pub duration: Option<Duration>,
}

impl MonitorConfig {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            duration: None,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn from_settings(settings: &MonitorSettings) -> Self {
        Self {
            interval: Duration::from_secs(settings.interval_secs),
            duration: settings.duration_secs.map(Duration::from_secs),
        }
    }
}

struct LoopHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct MonitorShared {
    config: MonitorConfig,
    provider: Arc<dyn MetricsProvider>,
    rules: Mutex<Vec<AlertRule>>,
    callbacks: Mutex<Vec<AlertCallback>>,
    latest: Mutex<HashMap<DeviceId, MetricsSnapshot>>,
    stopped: AtomicBool,
}

/// Periodic metrics poller with threshold alerting.
///
/// Owned by the caller: create, register rules and callbacks, `start`,
/// `stop`, drop. States are Idle and Running; `start` while running is a
/// no-op and `stop` joins the loop, so no callback fires after it returns.
/// A tick that is mid-flight when `stop` is called finishes its snapshot
/// but skips the rest of the pass.
pub struct DeviceMonitor {
    shared: Arc<MonitorShared>,
    runtime: Mutex<Option<LoopHandle>>,
}

impl DeviceMonitor {
    pub fn new(config: MonitorConfig, provider: Arc<dyn MetricsProvider>) -> Result<Self> {
        if config.interval.is_zero() {
            return Err(FleetError::InvalidConfig(
                "monitor interval must be positive".into(),
            ));
        }
        Ok(Self {
            shared: Arc::new(MonitorShared {
                config,
                provider,
                rules: Mutex::new(Vec::new()),
                callbacks: Mutex::new(Vec::new()),
                latest: Mutex::new(HashMap::new()),
                stopped: AtomicBool::new(false),
            }),
            runtime: Mutex::new(None),
        })
    }

    pub fn add_rule(&self, rule: AlertRule) {
        self.shared.rules.lock().unwrap().push(rule);
    }

    pub fn add_callback(
        &self,
        callback: impl Fn(&str, Severity, &MetricsSnapshot) + Send + Sync + 'static,
    ) {
        self.shared.callbacks.lock().unwrap().push(Arc::new(callback));
    }

    pub fn latest(&self, device: &DeviceId) -> Option<MetricsSnapshot> {
        self.shared.latest.lock().unwrap().get(device).cloned()
    }

    pub fn latest_all(&self) -> HashMap<DeviceId, MetricsSnapshot> {
        self.shared.latest.lock().unwrap().clone()
    }

    pub fn is_running(&self) -> bool {
        self.runtime
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|handle| !handle.task.is_finished())
    }

    /// Begin polling the given devices. Must be called within a tokio
    /// runtime. Calling start while the loop is running does nothing.
    pub fn start(&self, devices: Vec<DeviceId>) -> Result<()> {
        let mut runtime = self.runtime.lock().unwrap();
        if let Some(handle) = runtime.as_ref() {
            if !handle.task.is_finished() {
                warn!("monitor already running, ignoring start");
                return Ok(());
            }
        }

        self.shared.stopped.store(false, Ordering::SeqCst);
        let (stop_tx, stop_rx) = watch::channel(false);
        let shared = self.shared.clone();
        info!(
            devices = devices.len(),
            interval_ms = self.shared.config.interval.as_millis() as u64,
            "device monitor starting"
        );
        let task = tokio::spawn(run_loop(shared, devices, stop_rx));
        *runtime = Some(LoopHandle { stop_tx, task });
        Ok(())
    }

    /// Stop the loop and wait for it to wind down. After this returns no
    /// further callback fires. Stopping an idle monitor does nothing.
    pub async fn stop(&self) {
        let handle = self.runtime.lock().unwrap().take();
        let Some(handle) = handle else {
            return;
        };
        self.shared.stopped.store(true, Ordering::SeqCst);
        let _ = handle.stop_tx.send(true);
        if let Err(e) = handle.task.await {
            if e.is_panic() {
                error!("monitor task panicked during shutdown");
            }
        }
        info!("device monitor stopped");
    }
}

async fn run_loop(
    shared: Arc<MonitorShared>,
    devices: Vec<DeviceId>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(shared.config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let deadline = shared
        .config
        .duration
        .map(|d| tokio::time::Instant::now() + d);

    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            _ = ticker.tick() => {}
        }
        if shared.stopped.load(Ordering::SeqCst) {
            break;
        }

        tick(&shared, &devices).await;

        if let Some(deadline) = deadline {
            if tokio::time::Instant::now() >= deadline {
                info!("monitor duration elapsed");
                break;
            }
        }
    }
}

async fn tick(shared: &MonitorShared, devices: &[DeviceId]) {
    for device in devices {
        if shared.stopped.load(Ordering::SeqCst) {
            return;
        }
        let snapshot = match shared.provider.snapshot(device).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(device = device.short(), error = %e, "snapshot failed, skipping device");
                continue;
            }
        };
        shared
            .latest
            .lock()
            .unwrap()
            .insert(device.clone(), snapshot.clone());
        if shared.stopped.load(Ordering::SeqCst) {
            return;
        }
        evaluate_rules(shared, &snapshot);
    }
}

fn evaluate_rules(shared: &MonitorShared, snapshot: &MetricsSnapshot) {
    let rules = shared.rules.lock().unwrap().clone();
    let callbacks = shared.callbacks.lock().unwrap().clone();

    for rule in &rules {
        match std::panic::catch_unwind(AssertUnwindSafe(|| (rule.predicate)(snapshot))) {
            Ok(false) => {}
            Ok(true) => {
                debug!(
                    rule = rule.name(),
                    severity = %rule.severity(),
                    device = snapshot.device.short(),
                    "alert rule matched"
                );
                for callback in &callbacks {
                    let invoke = AssertUnwindSafe(|| {
                        callback(rule.name(), rule.severity(), snapshot)
                    });
                    if std::panic::catch_unwind(invoke).is_err() {
                        error!(rule = rule.name(), "alert callback panicked");
                    }
                }
            }
            Err(_) => {
                error!(
                    rule = rule.name(),
                    device = snapshot.device.short(),
                    "alert rule panicked, skipping"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(battery: i32, memory: f64, state: DeviceState) -> MetricsSnapshot {
        MetricsSnapshot {
            device: DeviceId::new("aaaa1111").unwrap(),
            timestamp: Utc::now(),
            state,
            battery_level: battery,
            battery_charging: false,
            memory_used_percent: memory,
            cpu_percent: 0.0,
            thermal_state: None,
        }
    }

    #[test]
    fn low_battery_ignores_unknown_level() {
        let rule = low_battery(20);
        assert!((rule.predicate)(&snapshot(5, 0.0, DeviceState::Connected)));
        assert!(!(rule.predicate)(&snapshot(50, 0.0, DeviceState::Connected)));
        assert!(!(rule.predicate)(&snapshot(-1, 0.0, DeviceState::Connected)));
    }

    #[test]
    fn high_memory_threshold() {
        let rule = high_memory(80.0);
        assert!((rule.predicate)(&snapshot(50, 92.5, DeviceState::Connected)));
        assert!(!(rule.predicate)(&snapshot(50, 79.9, DeviceState::Connected)));
    }

    #[test]
    fn disconnected_rule_matches_state() {
        let rule = device_disconnected();
        assert!((rule.predicate)(&snapshot(-1, 0.0, DeviceState::Disconnected)));
        assert!(!(rule.predicate)(&snapshot(90, 0.0, DeviceState::Connected)));
    }

    #[test]
    fn zero_interval_is_rejected() {
        struct Never;
        #[async_trait]
        impl MetricsProvider for Never {
            async fn snapshot(&self, device: &DeviceId) -> Result<MetricsSnapshot> {
                Ok(MetricsSnapshot::disconnected(device.clone()))
            }
        }

        let result = DeviceMonitor::new(MonitorConfig::new(Duration::ZERO), Arc::new(Never));
        assert!(matches!(result, Err(FleetError::InvalidConfig(_))));
    }
}
