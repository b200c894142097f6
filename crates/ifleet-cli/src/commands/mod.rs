use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use ifleet_core::config::FleetConfig;
use ifleet_core::device::{
    Backend, DeviceDiscovery, DeviceId, DeviceRegistry, SimctlDiscovery, UsbmuxDiscovery,
};

pub mod apps;
pub mod batch;
pub mod info;
pub mod launch;
pub mod list;
pub mod monitor;
pub mod screenshot;
pub mod terminate;

/// Flags shared by every command, split off the front of the arg list.
/// Anything unrecognized lands in `rest` for the command to interpret.
pub(crate) struct CommonArgs {
    pub udid: Option<String>,
    pub backend: Backend,
    pub simulators: bool,
    pub json: bool,
    pub config: FleetConfig,
    pub rest: Vec<String>,
}

pub(crate) fn parse_common(args: &[String]) -> anyhow::Result<CommonArgs> {
    let mut udid = None;
    let mut backend = Backend::Idb;
    let mut simulators = false;
    let mut json = false;
    let mut config_path: Option<PathBuf> = None;
    let mut rest = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-u" | "--udid" => {
                udid = Some(
                    iter.next()
                        .context("--udid requires a value")?
                        .to_string(),
                );
            }
            "--backend" => {
                backend = iter
                    .next()
                    .context("--backend requires a value")?
                    .parse()?;
            }
            "--config" => {
                config_path = Some(PathBuf::from(
                    iter.next().context("--config requires a value")?,
                ));
            }
            "--simulators" => simulators = true,
            "--json" => json = true,
            _ => rest.push(arg.to_string()),
        }
    }

    let config = match config_path {
        Some(path) => FleetConfig::load_from(&path)?,
        None => FleetConfig::load()?,
    };

    Ok(CommonArgs {
        udid,
        backend,
        simulators,
        json,
        config,
        rest,
    })
}

pub(crate) fn value_of(rest: &[String], name: &str) -> Option<String> {
    rest.iter()
        .position(|a| a == name)
        .and_then(|i| rest.get(i + 1))
        .cloned()
}

pub(crate) fn discovery_for(common: &CommonArgs) -> Arc<dyn DeviceDiscovery> {
    if common.simulators {
        Arc::new(SimctlDiscovery::new())
    } else {
        Arc::new(UsbmuxDiscovery)
    }
}

pub(crate) async fn discover_devices(common: &CommonArgs) -> anyhow::Result<Vec<DeviceId>> {
    let registry = DeviceRegistry::new(discovery_for(common));
    let devices = registry.refresh().await?;
    Ok(devices)
}

/// The device a single-device command targets: `--udid` when given,
/// otherwise the first discovered device.
pub(crate) async fn target_device(common: &CommonArgs) -> anyhow::Result<DeviceId> {
    if let Some(udid) = &common.udid {
        return Ok(DeviceId::new(udid.as_str())?);
    }
    discover_devices(common)
        .await?
        .into_iter()
        .next()
        .context("no device connected; plug one in or pass --udid")
}

pub(crate) fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Runtime::new()?)
}
