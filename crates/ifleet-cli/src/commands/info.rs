use ifleet_core::batch::FleetOps;

use super::{parse_common, runtime, target_device};

pub fn execute(args: &[String]) -> anyhow::Result<()> {
    let common = parse_common(args)?;
    let ops = FleetOps::new(common.backend, &common.config)?;

    let runtime = runtime()?;
    let device = runtime.block_on(target_device(&common))?;
    let info = runtime.block_on(ops.device_info(&device))?;

    if common.json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("Device: {device}");
    println!("  Name:    {}", info.name());
    println!("  Model:   {}", info.product_type());
    println!("  iOS:     {}", info.product_version());
    match info.battery_level() {
        -1 => println!("  Battery: unknown"),
        level => println!("  Battery: {level}%"),
    }
    Ok(())
}
