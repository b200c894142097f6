use anyhow::Context;

use super::{parse_common, runtime, target_device};

pub fn execute(args: &[String]) -> anyhow::Result<()> {
    let common = parse_common(args)?;
    let bundle_id = common
        .rest
        .first()
        .context("usage: ifleet launch <BUNDLE_ID> [-u UDID]")?
        .clone();
    let ops = ifleet_core::batch::FleetOps::new(common.backend, &common.config)?;

    let runtime = runtime()?;
    let device = runtime.block_on(target_device(&common))?;
    let client = ops.client(&device)?;
    runtime.block_on(async { client.launch_app(&bundle_id).await })?;

    println!("Launched {bundle_id} on {}", device.short());
    Ok(())
}
