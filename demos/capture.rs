//! Record raw cu8 samples from a dongle (or replay a capture) to a file.
//!
//! ```text
//! cargo run --example capture --features rtlsdr -- -c 1090M -s 2.4M -n 100 -o adsb.cu8
//! cargo run --example capture -- --input old.cs16 --format cs16 -n 10 -o new.cu8
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use rtlstream::replay::{ReplayConfig, ReplayDriver};
use rtlstream::{
    DeviceRegistry, DeviceSelector, Error, Gain, IqFormat, Session, StreamConfig, TunerConfig,
};
use tracing::{Level, info, warn};

#[derive(Debug, Clone, Copy)]
struct Frequency(u32);

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(stripped) = s.strip_suffix('M') {
            let val: f64 = stripped.trim().parse().map_err(|_| "Invalid MHz value")?;
            Ok(Frequency((val * 1_000_000.0).round() as u32))
        } else if let Some(stripped) = s.strip_suffix('k') {
            let val: f64 = stripped.trim().parse().map_err(|_| "Invalid kHz value")?;
            Ok(Frequency((val * 1_000.0).round() as u32))
        } else {
            let val: u32 = s.parse().map_err(|_| "Invalid Hz value")?;
            Ok(Frequency(val))
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Capture raw cu8 samples to a file", long_about = None)]
struct Args {
    /// Device index or serial number
    #[arg(short, long, default_value = "0")]
    device: DeviceSelector,

    /// Replay this capture file instead of opening a dongle
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Sample format of the replayed file
    #[arg(long, default_value = "cu8")]
    format: IqFormat,

    /// Center frequency in Hz (accepts k/M suffix, e.g. 105.1M)
    #[arg(short, long, value_parser = Frequency::from_str)]
    center_freq: Option<Frequency>,

    /// Sample rate in Hz (accepts k/M suffix)
    #[arg(short, long, value_parser = Frequency::from_str)]
    sample_rate: Option<Frequency>,

    /// Tuner gain in dB, automatic if omitted
    #[arg(short, long)]
    gain: Option<f64>,

    /// Frequency correction in ppm
    #[arg(short, long)]
    ppm: Option<i32>,

    /// Number of buffers to capture
    #[arg(short, long, default_value_t = 20)]
    num_buffers: usize,

    /// Bytes per buffer
    #[arg(long, default_value_t = 262_144)]
    buffer_size: usize,

    /// Buffers in the pool
    #[arg(long, default_value_t = 15)]
    buffers: usize,

    /// Output file
    #[arg(short, long)]
    output: PathBuf,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn registry(args: &Args) -> rtlstream::Result<DeviceRegistry> {
    if let Some(input) = &args.input {
        let config = ReplayConfig::new(input)
            .iq_format(args.format)
            .realtime(true);
        return Ok(DeviceRegistry::new(ReplayDriver::new(config)));
    }
    #[cfg(feature = "rtlsdr")]
    {
        DeviceRegistry::usb()
    }
    #[cfg(not(feature = "rtlsdr"))]
    {
        Err(Error::Unsupported(
            "USB dongles (build with --features rtlsdr, or pass --input)",
        ))
    }
}

fn main() -> rtlstream::Result<()> {
    let args = Args::parse();
    let level = match args.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let registry = registry(&args)?;
    let mut session = Session::open(&registry, &args.device)?;

    let tuner = TunerConfig {
        center_freq: args.center_freq.map(|f| f.0),
        sample_rate: args.sample_rate.map(|f| f.0),
        gain: Some(args.gain.map_or(Gain::Auto, Gain::from_db)),
        freq_correction: args.ppm,
        ..TunerConfig::default()
    };
    let settings = session.configure(&tuner)?;
    info!(
        "tuned to {} Hz at {} S/s, gain {}",
        settings.center_freq, settings.sample_rate, settings.gain
    );

    let mut out = BufWriter::new(File::create(&args.output)?);
    session.start_with(StreamConfig::new(args.buffer_size, args.buffers))?;

    let mut written = 0usize;
    for _ in 0..args.num_buffers {
        let buffer = match session.read() {
            Ok(buffer) => buffer,
            Err(Error::DeviceDisconnected(reason)) => {
                warn!("stream ended: {}", reason);
                break;
            }
            Err(e) => return Err(e),
        };
        out.write_all(buffer.as_bytes())?;
        written += buffer.len();
        session.release(buffer)?;
    }
    out.flush()?;

    if let Some(stats) = session.stats() {
        info!(
            "{} buffers delivered, {} backpressure events",
            stats.delivered, stats.backpressure_events
        );
    }
    session.close()?;
    info!("wrote {} bytes to {}", written, args.output.display());
    Ok(())
}
