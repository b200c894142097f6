use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use ifleet_core::device::DeviceId;
use ifleet_core::monitor::{
    AlertRule, AutomationMetricsProvider, DeviceMonitor, MonitorConfig, Severity,
    device_disconnected, high_memory, low_battery,
};

use super::{discover_devices, parse_common, value_of};

pub fn execute(args: &[String]) -> anyhow::Result<()> {
    let common = parse_common(args)?;

    let mut monitor_config = MonitorConfig::from_settings(&common.config.monitor);
    if let Some(raw) = value_of(&common.rest, "--interval") {
        let secs: u64 = raw.parse().context("--interval expects seconds")?;
        monitor_config.interval = Duration::from_secs(secs);
    }
    if let Some(raw) = value_of(&common.rest, "--duration") {
        let secs: u64 = raw.parse().context("--duration expects seconds")?;
        monitor_config.duration = Some(Duration::from_secs(secs));
    }
    let alerts_only = common.rest.iter().any(|a| a == "--alerts");
    let battery_threshold: i32 = match value_of(&common.rest, "--battery-threshold") {
        Some(raw) => raw.parse().context("--battery-threshold expects a percentage")?,
        None => 20,
    };

    let runtime = super::runtime()?;
    runtime.block_on(async move {
        let devices = match &common.udid {
            Some(udid) => vec![DeviceId::new(udid.as_str())?],
            None => discover_devices(&common).await?,
        };
        anyhow::ensure!(!devices.is_empty(), "no devices to monitor");

        let provider = Arc::new(AutomationMetricsProvider::new(
            common.backend,
            common.config.companion.clone(),
        ));
        let interval_secs = monitor_config.interval.as_secs();
        let monitor = DeviceMonitor::new(monitor_config, provider)?;

        if alerts_only {
            monitor.add_rule(low_battery(battery_threshold));
            monitor.add_rule(high_memory(80.0));
            monitor.add_rule(device_disconnected());
        } else {
            // no filtering requested: report every reading
            monitor.add_rule(AlertRule::new("reading", Severity::Info, |_| true));
        }
        monitor.add_callback(|rule, severity, snapshot| {
            let battery = match snapshot.battery_level {
                -1 => "battery unknown".to_string(),
                level => format!("battery {level}%"),
            };
            println!(
                "[{severity}] {rule}: {} {:?} {battery}",
                snapshot.device.short(),
                snapshot.state
            );
        });

        monitor.start(devices)?;
        println!("Monitoring every {interval_secs}s - press Ctrl-C to stop");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => println!("Stopping monitor"),
            _ = async {
                while monitor.is_running() {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
            } => {}
        }
        monitor.stop().await;

        let final_state = monitor.latest_all();
        if !final_state.is_empty() {
            println!("Last readings:");
            let mut entries: Vec<_> = final_state.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            for (device, snapshot) in entries {
                println!(
                    "  {} {:?} battery {}%",
                    device.short(),
                    snapshot.state,
                    snapshot.battery_level
                );
            }
        }
        Ok(())
    })
}
