use std::path::PathBuf;

use anyhow::Context;
use ifleet_core::batch::{BatchReport, FleetOps};
use ifleet_core::device::DeviceId;

use super::{CommonArgs, discover_devices, parse_common, value_of};

const USAGE: &str = "usage: ifleet batch <info|status|screenshot|launch|terminate> \
[--workers N] [--output REPORT.json] [--out-dir DIR] [BUNDLE_ID]";

pub fn execute(args: &[String]) -> anyhow::Result<()> {
    let mut common = parse_common(args)?;

    if let Some(workers) = value_of(&common.rest, "--workers") {
        common.config.executor.max_workers =
            workers.parse().context("--workers expects a number")?;
        common.config.validate()?;
    }
    let report_path = value_of(&common.rest, "--output").map(PathBuf::from);

    let positional = positionals(&common.rest);
    let operation = positional.first().context(USAGE)?.clone();

    let ops = FleetOps::new(common.backend, &common.config)?;
    let runtime = super::runtime()?;
    let devices = runtime.block_on(resolve_devices(&common))?;
    anyhow::ensure!(!devices.is_empty(), "no devices to operate on");

    let report = match operation.as_str() {
        "info" => {
            let records = runtime.block_on(ops.batch_info(&devices));
            BatchReport::from_records("device_info", &records)
        }
        "status" => {
            let records = runtime.block_on(ops.batch_status(&devices));
            BatchReport::from_records("device_status", &records)
        }
        "screenshot" => {
            let out_dir = value_of(&common.rest, "--out-dir")
                .map(PathBuf::from)
                .unwrap_or_else(|| common.config.paths.screenshot_dir.clone());
            let records = runtime.block_on(ops.batch_screenshot(&devices, &out_dir))?;
            BatchReport::from_records("screenshot", &records)
        }
        "launch" => {
            let bundle_id = positional.get(1).context(USAGE)?;
            let records = runtime.block_on(ops.batch_launch(&devices, bundle_id));
            BatchReport::from_records("launch_app", &records)
        }
        "terminate" => {
            let bundle_id = positional.get(1).context(USAGE)?;
            let records = runtime.block_on(ops.batch_terminate(&devices, bundle_id));
            BatchReport::from_records("terminate_app", &records)
        }
        other => anyhow::bail!("unknown batch operation '{other}'\n{USAGE}"),
    };

    if let Some(path) = report_path {
        report.save_json(&path)?;
        println!("Report written to {}", path.display());
    }

    if common.json {
        println!("{}", report.to_json()?);
    } else {
        print_report(&report);
    }

    anyhow::ensure!(
        report.summary.succeeded > 0,
        "batch '{}' failed on every device",
        report.summary.operation
    );
    Ok(())
}

async fn resolve_devices(common: &CommonArgs) -> anyhow::Result<Vec<DeviceId>> {
    match &common.udid {
        Some(udid) => Ok(vec![DeviceId::new(udid.as_str())?]),
        None => discover_devices(common).await,
    }
}

/// Everything in `rest` that is not a `--flag value` pair.
fn positionals(rest: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    let mut iter = rest.iter();
    while let Some(arg) = iter.next() {
        if arg.starts_with("--") {
            iter.next();
        } else {
            out.push(arg.clone());
        }
    }
    out
}

fn print_report(report: &BatchReport) {
    let summary = &report.summary;
    println!(
        "Batch '{}': {}/{} succeeded ({:.1}%) in {}ms",
        summary.operation,
        summary.succeeded,
        summary.total,
        summary.success_rate,
        summary.total_duration_ms
    );
    for record in &report.records {
        if record.success {
            println!("  OK   {} ({}ms)", record.device, record.duration_ms);
        } else {
            println!(
                "  FAIL {} - {}",
                record.device,
                record.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}
