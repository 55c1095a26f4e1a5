//! # Pitch Monitor
//!
//! Headless front end for the pitch detection pipeline. It loads the
//! configuration, opens the selected sample source, and runs the
//! acquisition loop until interrupted.
//!
//! ## Sources
//! - **live**: the default audio input device, paced in real time
//! - **replay**: a saved dump of raw counts or volts, analyzed as fast as possible
//! - **tone**: a synthetic sine, paced in real time
//!
//! Results go to the terminal: a character-display rendering of the note
//! and frequency, and optionally a colored level bar standing in for the
//! LED strip.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{Level, info, warn};

use pitch_core::adc::{AdcSource, CpalAdc, ReplaySource, SyntheticSource};
use pitch_core::clock::{CancelToken, Clock, MonotonicClock, SimulatedClock};
use pitch_core::config::StripConfig;
use pitch_core::display::{TerminalDisplay, TerminalStrip};
use pitch_core::{Gain, MonitorConfig, Pipeline};

/// Amplitude and bias of the synthetic tone, in volts.
const TONE_AMPLITUDE_VOLTS: f64 = 1.0;
const TONE_OFFSET_VOLTS: f64 = 2.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Source {
    /// Default audio input device
    Live,
    /// Saved dump of raw counts or volts (requires --replay)
    Replay,
    /// Synthetic sine tone (see --tone)
    Tone,
}

/// Detect the dominant pitch of a sampled signal and show the nearest note
#[derive(Parser, Debug)]
#[command(name = "pitch-monitor")]
#[command(version, about, long_about = None)]
struct Args {
    /// JSON configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Where samples come from
    #[arg(short, long, value_enum, default_value = "live")]
    source: Source,

    /// Sample dump to replay
    #[arg(long, value_name = "FILE", required_if_eq("source", "replay"))]
    replay: Option<PathBuf>,

    /// Frequency of the synthetic tone in Hz
    #[arg(long, value_name = "HZ", default_value = "220")]
    tone: f64,

    /// Samples per frame (power of two)
    #[arg(short = 'n', long)]
    samples: Option<usize>,

    /// Sample rate in Hz
    #[arg(short, long)]
    rate: Option<f64>,

    /// ADC gain: 2/3, 1, 2, 4, 8 or 16
    #[arg(short, long)]
    gain: Option<Gain>,

    /// Stop after this many cycles
    #[arg(long)]
    cycles: Option<u64>,

    /// Number of pixels in the level bar
    #[arg(long)]
    pixels: Option<usize>,

    /// Disable the level bar
    #[arg(long)]
    no_strip: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .with_target(false)
        .init();

    let config = build_config(&args)?;

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || handler_token.cancel())
        .context("failed to install interrupt handler")?;

    match args.source {
        Source::Live => {
            let adc = CpalAdc::open_default().context("failed to open audio input")?;
            run(&config, adc, MonotonicClock::new(), &cancel, args.cycles)
        }
        Source::Replay => {
            let path = args.replay.as_deref().context("--source replay needs --replay FILE")?;
            let adc = ReplaySource::open(path)
                .with_context(|| format!("failed to load sample dump {}", path.display()))?;
            info!("Replaying {} readings from {}", adc.remaining(), path.display());
            run(&config, adc, SimulatedClock::new(), &cancel, args.cycles)
        }
        Source::Tone => {
            let adc = SyntheticSource::new(args.tone, TONE_AMPLITUDE_VOLTS)
                .with_offset(TONE_OFFSET_VOLTS);
            run(&config, adc, MonotonicClock::new(), &cancel, args.cycles)
        }
    }
}

/// Loads the configuration file, if any, and applies command-line
/// overrides. Validation happens once the ADC is known.
fn build_config(args: &Args) -> Result<MonitorConfig> {
    let mut config = match &args.config {
        Some(path) => MonitorConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => MonitorConfig::default(),
    };

    if let Some(samples) = args.samples {
        config.sampling.sample_count = samples;
    }
    if let Some(rate) = args.rate {
        config.sampling.sample_rate_hz = rate;
    }
    if let Some(gain) = args.gain {
        config.sampling.gain = gain;
    }
    if let Some(pixels) = args.pixels {
        let strip = config.strip.get_or_insert_with(StripConfig::default);
        strip.pixels = pixels;
    }
    if args.no_strip {
        config.strip = None;
    }
    Ok(config)
}

fn run<A: AdcSource, C: Clock>(
    config: &MonitorConfig,
    adc: A,
    clock: C,
    cancel: &CancelToken,
    cycles: Option<u64>,
) -> Result<()> {
    let geometry = config.display;
    let display = TerminalDisplay::new(std::io::stdout(), geometry.rows, geometry.cols);
    let mut pipeline = Pipeline::new(config, adc, clock, Box::new(display))
        .context("invalid configuration, not starting")?;
    if let Some(strip) = &config.strip {
        let sink = TerminalStrip::new(std::io::stdout(), strip.pixels);
        pipeline = pipeline.with_strip(Box::new(sink));
    }

    info!("Press Ctrl+C to stop.");
    let summary = pipeline.run(cancel, cycles);
    pipeline.shutdown();

    if summary.completed == 0 && summary.skipped > 0 {
        warn!("No frame was acquired successfully");
    }
    Ok(())
}
