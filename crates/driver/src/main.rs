//! recon
//!
//! Connects to a USB fan controller, asks every channel for its temperature
//! and fan speed, and prints the reports the device sends back until the
//! duration expires or Ctrl+C is pressed.

use anyhow::{Context, Result};
use clap::Parser;
use common::{DebugFlags, TracingSink, setup_logging};
use driver::transport::{HostContext, UsbBackend};
use driver::{Controller, DriverConfig, RusbBackend, list_matching};
use protocol::{Channel, PRODUCT_ID, VENDOR_ID};
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "recon")]
#[command(author, version, about = "Driver for the five-channel USB fan controller")]
#[command(long_about = "
Talks to a USB fan controller (0c45:7100): connects, requests temperature and
fan speed of every channel, and prints the decoded reports.

EXAMPLES:
    # Connect to the first controller and print reports for 30 seconds
    recon

    # Second controller, protocol and libusb debug output, 10 seconds
    recon --index 1 --debug --debugusb --duration 10

    # List connected controllers
    recon --list-devices

CONFIGURATION:
    Configuration files are searched in the following order:
    1. Path specified with --config
    2. ~/.config/recon/recon.toml
    3. /etc/recon/recon.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List connected fan controllers and exit
    #[arg(long)]
    list_devices: bool,

    /// 0-based index of the controller to use
    #[arg(short, long, value_name = "N")]
    index: Option<usize>,

    /// Seconds to stay connected
    #[arg(short, long, value_name = "SECS")]
    duration: Option<u64>,

    /// Protocol debug output (connection steps, packets, reports)
    #[arg(long)]
    debug: bool,

    /// libusb debug output
    #[arg(long)]
    debugusb: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = DriverConfig::default();
        let path = DriverConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let mut config = if let Some(ref path) = args.config {
        DriverConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        DriverConfig::load_or_default()
    };
    apply_overrides(&mut config, &args);
    config.validate().context("Invalid configuration")?;

    let flags = config.debug_flags();
    setup_logging(&config.driver.log_level, flags).context("Failed to setup logging")?;

    info!("recon v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", config.driver.log_level);

    if args.list_devices {
        return tokio::task::spawn_blocking(move || list_devices_mode(flags))
            .await
            .context("Device listing task failed")?;
    }

    run(config, flags).await
}

fn apply_overrides(config: &mut DriverConfig, args: &Args) {
    if let Some(index) = args.index {
        config.driver.device_index = index;
    }
    if let Some(duration) = args.duration {
        config.driver.duration_secs = duration;
    }
    if let Some(ref level) = args.log_level {
        config.driver.log_level = level.clone();
    }
    config.debug.protocol |= args.debug;
    config.debug.usb |= args.debugusb;
}

/// List matching devices and exit
fn list_devices_mode(flags: DebugFlags) -> Result<()> {
    let context = RusbBackend
        .open_context(flags.usb)
        .context("Failed to open USB context")?;
    let devices = list_matching(&context, VENDOR_ID, PRODUCT_ID);
    context.close();
    let devices = devices.context("Failed to enumerate USB devices")?;

    if devices.is_empty() {
        println!("No fan controllers found.");
    } else {
        println!("Found {} fan controller(s):\n", devices.len());
        for (index, device) in devices.iter().enumerate() {
            println!("  [{}] {}", index, device);
        }
    }

    Ok(())
}

async fn run(config: DriverConfig, flags: DebugFlags) -> Result<()> {
    let options = config.connect_options();
    let index = options.index;
    let sink = TracingSink::shared(flags);

    let controller = tokio::task::spawn_blocking(move || {
        Controller::connect_with(&RusbBackend, sink, options)
    })
    .await
    .context("Connect task failed")?
    .with_context(|| format!("Failed to connect to fan controller at index {}", index))?;

    for channel in Channel::all() {
        if let Err(e) = controller.request_temperature_and_speed(channel) {
            warn!("Request for {} failed: {}", channel, e);
        }
    }

    let reports = controller.reports();
    let deadline = tokio::time::sleep(config.duration());
    tokio::pin!(deadline);

    info!("Press Ctrl+C to stop");
    loop {
        tokio::select! {
            _ = &mut deadline => {
                info!("Duration elapsed after {:?}", config.duration());
                break;
            }
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Error waiting for Ctrl+C: {}", e);
                }
                info!("Received Ctrl+C, shutting down...");
                break;
            }
            report = reports.recv() => match report {
                Ok(report) => println!("{}", report),
                Err(_) => {
                    warn!("Read loop stopped, device may be gone");
                    break;
                }
            },
        }
    }

    let stats = controller.stats();
    tokio::task::spawn_blocking(move || controller.close())
        .await
        .context("Close task failed")?;
    info!("Session statistics: {}", stats);
    Ok(())
}
