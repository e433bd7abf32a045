//! usbredir-server
//!
//! Exports one USB device over TCP/IPv6 to a single remote guest speaking this
//! workspace's redirection protocol.

use anyhow::{Context, Result};
use clap::Parser;
use common::{DeviceIdentity, setup_logging, verbosity_filter};
use server::config::{self, Overrides, RuntimeOptions, ServerConfig};
use server::host::UsbRedirHostFactory;
use server::usb::LibusbSubsystem;
use server::{Engine, SERVER_VERSION, Server, ShutdownToken, bind_listener};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "usbredir-server")]
#[command(author, version, about = "Export a USB device over TCP using usbredir")]
#[command(long_about = "
Exports a single USB device to one remote usbredir client at a time.

The device is named either by bus and address in decimal (BUS-ADDRESS, e.g.
1-4) or by vendor and product id in hex (VENDOR:PRODUCT, e.g. 1234:abcd).

EXAMPLES:
    # Export the device at bus 1, address 4 on the default port 4000
    usbredir-server 1-4

    # Export by vendor:product and keep the client across unplug/replug
    usbredir-server --wait 1234:abcd

    # List attached devices
    usbredir-server --list-devices

CONFIGURATION:
    The server looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/usbredir-server/server.toml
    3. /etc/usbredir-server/server.toml
    4. Built-in defaults
    Command-line options override file values.
")]
struct Args {
    /// Device to export: BUS-ADDRESS or VENDOR:PRODUCT
    #[arg(
        value_name = "DEVICE",
        required_unless_present_any = ["list_devices", "save_config"]
    )]
    device: Option<DeviceIdentity>,

    /// TCP port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Verbosity level, 0 (silent) to 5 (packet dumps)
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=5))]
    verbose: Option<u8>,

    /// Keep the client connected while the device is unplugged
    #[arg(short, long)]
    wait: bool,

    /// Device poll interval in seconds while waiting
    #[arg(short = 't', long, value_name = "SECS")]
    wait_timeout: Option<u64>,

    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List USB devices and exit
    #[arg(long)]
    list_devices: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = ServerConfig::default();
        let path = ServerConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = match args.config.as_deref() {
        Some(path) => config::load_config(path).context("Failed to load configuration")?,
        None => ServerConfig::load_or_default(),
    };

    let overrides = Overrides {
        port: args.port,
        verbose: args.verbose,
        wait: args.wait,
        wait_timeout_secs: args.wait_timeout,
    };
    let verbose = overrides.verbose.unwrap_or(config.server.verbose);
    setup_logging(verbosity_filter(verbose)).context("Failed to setup logging")?;

    info!("{}", SERVER_VERSION);

    let usb = LibusbSubsystem::new(verbose).context("Could not init libusb")?;

    if args.list_devices {
        return list_devices(&usb);
    }

    let Some(identity) = args.device else {
        anyhow::bail!("Missing usb device identifier argument");
    };
    let options = RuntimeOptions::resolve(identity, &config, &overrides)?;
    info!(
        "Exporting {} on port {}{}",
        options.identity,
        options.port,
        if options.wait_mode { " (wait mode)" } else { "" }
    );

    let shutdown = ShutdownToken::from_signals().context("Failed to install signal handlers")?;
    let listener = bind_listener(options.port)
        .with_context(|| format!("Failed to listen on port {}", options.port))?;

    let factory = UsbRedirHostFactory::new(SERVER_VERSION, options.verbose);
    let engine = Engine::new(usb, factory, options.session_options(), shutdown);
    Server::new(listener, engine)
        .run()
        .context("Server stopped on a fatal error")?;

    info!("Exiting");
    Ok(())
}

fn list_devices(usb: &LibusbSubsystem) -> Result<()> {
    let devices = usb.list_devices().context("Failed to enumerate USB devices")?;

    if devices.is_empty() {
        println!("No USB devices found.");
        return Ok(());
    }

    println!("Found {} USB device(s):\n", devices.len());
    for device in devices {
        println!(
            "  {}-{}  {:04x}:{:04x} - {} {}",
            device.bus_number,
            device.device_address,
            device.vendor_id,
            device.product_id,
            device
                .manufacturer
                .as_deref()
                .unwrap_or("Unknown Manufacturer"),
            device.product.as_deref().unwrap_or("Unknown Product")
        );
        println!(
            "      Class {:02x}/{:02x}/{:02x} Speed: {:?}",
            device.class, device.subclass, device.protocol, device.speed
        );
        if let Some(serial) = &device.serial_number {
            println!("      Serial: {}", serial);
        }
        println!();
    }
    Ok(())
}
