use std::path::PathBuf;

use super::{parse_common, runtime, target_device};

pub fn execute(args: &[String]) -> anyhow::Result<()> {
    let common = parse_common(args)?;
    let ops = ifleet_core::batch::FleetOps::new(common.backend, &common.config)?;

    let runtime = runtime()?;
    let device = runtime.block_on(target_device(&common))?;

    let output = common
        .rest
        .first()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(format!("{}.png", device.short())));

    let client = ops.client(&device)?;
    let bytes = runtime.block_on(async { client.screenshot().await })?;
    std::fs::write(&output, &bytes)?;

    println!("Saved screenshot of {} to {}", device.short(), output.display());
    Ok(())
}
