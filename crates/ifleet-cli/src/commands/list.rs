use super::{discover_devices, parse_common, runtime};

pub fn execute(args: &[String]) -> anyhow::Result<()> {
    let common = parse_common(args)?;
    let devices = runtime()?.block_on(discover_devices(&common))?;

    if common.json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    if devices.is_empty() {
        println!("No devices connected");
        return Ok(());
    }
    println!("Connected devices ({}):", devices.len());
    for device in &devices {
        println!("  {device}");
    }
    Ok(())
}
