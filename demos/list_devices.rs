//! List attached RTL2832U dongles with their tuner capabilities.
//!
//! ```text
//! cargo run --example list_devices --features rtlsdr
//! ```

use clap::Parser;
use rtlstream::{DeviceRegistry, DeviceSelector};
use tracing::{Level, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "List RTL-SDR devices", long_about = None)]
struct Args {
    /// Open each device to report tuner details
    #[arg(short, long, default_value_t = false)]
    probe: bool,

    /// Increase log verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[cfg(feature = "rtlsdr")]
fn registry() -> rtlstream::Result<DeviceRegistry> {
    DeviceRegistry::usb()
}

#[cfg(not(feature = "rtlsdr"))]
fn registry() -> rtlstream::Result<DeviceRegistry> {
    // Without USB support, show what the simulated backend looks like
    Ok(DeviceRegistry::new(rtlstream::sim::SimDriver::new(2)))
}

fn main() -> rtlstream::Result<()> {
    let args = Args::parse();
    let level = if args.verbose > 0 { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::fmt().with_max_level(level).init();

    let registry = registry()?;
    let devices = registry.devices()?;
    println!("Found {} device(s):", devices.len());

    for info in devices {
        println!("  {}", info);
        if !args.probe {
            continue;
        }
        match registry.open(&DeviceSelector::Index(info.index)) {
            Ok(mut handle) => {
                let caps = handle.capabilities();
                println!(
                    "      tuner: {}, {}..={} Hz, xtal {} Hz",
                    caps.tuner, caps.frequency.min, caps.frequency.max, caps.rtl_xtal_freq
                );
                let gains: Vec<String> = caps
                    .gains
                    .iter()
                    .map(|g| format!("{:.1}", f64::from(*g) / 10.0))
                    .collect();
                println!("      gains (dB): {}", gains.join(" "));
                if let Err(e) = handle.close() {
                    warn!("closing device {}: {}", info.index, e);
                }
            }
            Err(e) => println!("      cannot open: {}", e),
        }
    }
    Ok(())
}
