use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use ifleet_core::device::{DeviceId, DeviceState};
use ifleet_core::monitor::{
    AlertRule, DeviceMonitor, MetricsProvider, MetricsSnapshot, MonitorConfig, Severity,
};
use ifleet_core::{FleetError, Result};

struct FakeProvider {
    polls: Arc<AtomicUsize>,
    battery: i32,
    fail_device: Option<DeviceId>,
}

impl FakeProvider {
    fn new(battery: i32) -> Self {
        Self {
            polls: Arc::new(AtomicUsize::new(0)),
            battery,
            fail_device: None,
        }
    }
}

#[async_trait]
impl MetricsProvider for FakeProvider {
    async fn snapshot(&self, device: &DeviceId) -> Result<MetricsSnapshot> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if self.fail_device.as_ref() == Some(device) {
            return Err(FleetError::Command("sensor unavailable".into()));
        }
        Ok(MetricsSnapshot {
            device: device.clone(),
            timestamp: Utc::now(),
            state: DeviceState::Connected,
            battery_level: self.battery,
            battery_charging: false,
            memory_used_percent: 40.0,
            cpu_percent: 10.0,
            thermal_state: None,
        })
    }
}

fn device(raw: &str) -> DeviceId {
    DeviceId::new(raw).unwrap()
}

fn always_true() -> AlertRule {
    AlertRule::new("always", Severity::Info, |_| true)
}

#[tokio::test]
async fn callback_fires_on_every_tick_and_none_after_stop() {
    let provider = Arc::new(FakeProvider::new(90));
    let monitor = DeviceMonitor::new(
        MonitorConfig::new(Duration::from_millis(50)),
        provider.clone(),
    )
    .unwrap();

    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_cb = fired.clone();
    monitor.add_rule(always_true());
    monitor.add_callback(move |_, _, _| {
        fired_in_cb.fetch_add(1, Ordering::SeqCst);
    });

    monitor.start(vec![device("aaaa1111")]).unwrap();
    tokio::time::sleep(Duration::from_millis(230)).await;
    monitor.stop().await;

    let at_stop = fired.load(Ordering::SeqCst);
    assert!(at_stop >= 2, "expected several ticks, saw {at_stop}");

    // longer than one interval: a still-live loop would have fired again
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(fired.load(Ordering::SeqCst), at_stop);
    assert!(!monitor.is_running());
}

#[tokio::test]
async fn start_while_running_is_a_no_op() {
    let provider = Arc::new(FakeProvider::new(90));
    let monitor = DeviceMonitor::new(
        MonitorConfig::new(Duration::from_millis(40)),
        provider.clone(),
    )
    .unwrap();

    monitor.start(vec![device("aaaa1111")]).unwrap();
    assert!(monitor.is_running());

    // second start must not spawn a second loop
    monitor.start(vec![device("bbbb2222")]).unwrap();
    tokio::time::sleep(Duration::from_millis(130)).await;
    monitor.stop().await;

    // only the first device was ever polled
    assert!(monitor.latest(&device("aaaa1111")).is_some());
    assert!(monitor.latest(&device("bbbb2222")).is_none());
}

#[tokio::test]
async fn stop_when_idle_is_a_no_op() {
    let monitor = DeviceMonitor::new(
        MonitorConfig::new(Duration::from_millis(40)),
        Arc::new(FakeProvider::new(90)),
    )
    .unwrap();

    assert!(!monitor.is_running());
    monitor.stop().await;
    assert!(!monitor.is_running());
}

#[tokio::test]
async fn duration_expiry_returns_monitor_to_idle() {
    let provider = Arc::new(FakeProvider::new(90));
    let polls = provider.polls.clone();
    let monitor = DeviceMonitor::new(
        MonitorConfig::new(Duration::from_millis(40)).with_duration(Duration::from_millis(100)),
        provider,
    )
    .unwrap();

    monitor.start(vec![device("aaaa1111")]).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(!monitor.is_running());
    let after_expiry = polls.load(Ordering::SeqCst);
    assert!(after_expiry >= 1);

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(polls.load(Ordering::SeqCst), after_expiry);
}

#[tokio::test]
async fn provider_error_skips_device_but_keeps_loop_alive() {
    let mut provider = FakeProvider::new(90);
    provider.fail_device = Some(device("bbbb2222"));
    let monitor = DeviceMonitor::new(
        MonitorConfig::new(Duration::from_millis(40)),
        Arc::new(provider),
    )
    .unwrap();

    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_cb = fired.clone();
    monitor.add_rule(always_true());
    monitor.add_callback(move |_, _, snapshot| {
        assert_eq!(snapshot.device.as_str(), "aaaa1111");
        fired_in_cb.fetch_add(1, Ordering::SeqCst);
    });

    monitor
        .start(vec![device("bbbb2222"), device("aaaa1111")])
        .unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    monitor.stop().await;

    assert!(fired.load(Ordering::SeqCst) >= 1);
    assert!(monitor.latest(&device("aaaa1111")).is_some());
    assert!(monitor.latest(&device("bbbb2222")).is_none());
}

#[tokio::test]
async fn panicking_rule_does_not_stop_other_rules() {
    let monitor = DeviceMonitor::new(
        MonitorConfig::new(Duration::from_millis(40)),
        Arc::new(FakeProvider::new(10)),
    )
    .unwrap();

    monitor.add_rule(AlertRule::new("broken", Severity::Critical, |_| {
        panic!("predicate bug")
    }));
    monitor.add_rule(ifleet_core::monitor::low_battery(20));

    let low_battery_alerts = Arc::new(AtomicUsize::new(0));
    let counter = low_battery_alerts.clone();
    monitor.add_callback(move |rule, severity, _| {
        assert_eq!(rule, "low_battery");
        assert_eq!(severity, Severity::Warning);
        counter.fetch_add(1, Ordering::SeqCst);
    });

    monitor.start(vec![device("aaaa1111")]).unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    monitor.stop().await;

    assert!(low_battery_alerts.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn latest_keeps_only_newest_snapshot_per_device() {
    let provider = Arc::new(FakeProvider::new(55));
    let monitor = DeviceMonitor::new(
        MonitorConfig::new(Duration::from_millis(30)),
        provider.clone(),
    )
    .unwrap();

    monitor.start(vec![device("aaaa1111")]).unwrap();
    tokio::time::sleep(Duration::from_millis(160)).await;
    monitor.stop().await;

    assert!(provider.polls.load(Ordering::SeqCst) >= 3);
    let all = monitor.latest_all();
    assert_eq!(all.len(), 1);
    assert_eq!(all[&device("aaaa1111")].battery_level, 55);
}
