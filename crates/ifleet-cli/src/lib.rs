pub mod commands;

pub fn run(args: &[String]) -> anyhow::Result<()> {
    if args.is_empty() {
        print_usage();
        anyhow::bail!("No command provided");
    }

    match args[0].as_str() {
        "list" => commands::list::execute(&args[1..]),
        "info" => commands::info::execute(&args[1..]),
        "apps" => commands::apps::execute(&args[1..]),
        "launch" => commands::launch::execute(&args[1..]),
        "terminate" => commands::terminate::execute(&args[1..]),
        "screenshot" => commands::screenshot::execute(&args[1..]),
        "batch" => commands::batch::execute(&args[1..]),
        "monitor" => commands::monitor::execute(&args[1..]),
        "help" => {
            print_usage();
            Ok(())
        }
        "-h" | "--help" => {
            print_usage();
            Ok(())
        }
        "-v" | "--version" => {
            print_version();
            Ok(())
        }
        _ => {
            eprintln!("Error: Unknown command '{}'", args[0]);
            print_usage();
            anyhow::bail!("Unknown command: {}", args[0])
        }
    }
}

fn print_usage() {
    println!("iFleet - batch automation and monitoring for iOS device fleets");
    println!();
    println!("USAGE:");
    println!("    ifleet <COMMAND> [OPTIONS]");
    println!();
    println!("COMMANDS:");
    println!("    list          List connected devices");
    println!("    info          Show device information");
    println!("    apps          List installed apps on a device");
    println!("    launch        Launch an app by bundle id");
    println!("    terminate     Terminate a running app");
    println!("    screenshot    Capture a device screenshot");
    println!("    batch         Run an operation across many devices");
    println!("    monitor       Poll device metrics and raise alerts");
    println!("    help          Print this help message");
    println!();
    println!("OPTIONS:");
    println!("    -u, --udid <UDID>      Target a specific device");
    println!("    --backend <idb|wda>    Automation backend (default: idb)");
    println!("    --simulators           Discover simulators instead of USB devices");
    println!("    --json                 Machine-readable output");
    println!("    -h, --help             Print help information");
    println!("    -v, --version          Print version information");
}

fn print_version() {
    println!("ifleet {}", env!("CARGO_PKG_VERSION"));
}
