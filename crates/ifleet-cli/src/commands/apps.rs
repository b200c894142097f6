use ifleet_core::batch::FleetOps;

use super::{parse_common, runtime, target_device};

pub fn execute(args: &[String]) -> anyhow::Result<()> {
    let common = parse_common(args)?;
    let ops = FleetOps::new(common.backend, &common.config)?;

    let runtime = runtime()?;
    let device = runtime.block_on(target_device(&common))?;
    let client = ops.client(&device)?;
    let apps = runtime.block_on(async { client.list_apps().await })?;

    if common.json {
        println!("{}", serde_json::to_string_pretty(&apps)?);
        return Ok(());
    }

    println!("Installed apps on {} ({}):", device.short(), apps.len());
    for app in &apps {
        println!("  {} - {}", app.bundle_id, app.name);
    }
    Ok(())
}
