//! # ADC Source Module
//!
//! The narrow interface the sampler reads through, plus three sources:
//!
//! - [`CpalAdc`]: a live audio input device used as a continuous-conversion
//!   ADC (via CPAL).
//! - [`ReplaySource`]: replays a previously saved dump of readings.
//! - [`SyntheticSource`]: a quantized sine generator.
//!
//! All of them speak raw 16-bit counts; the sampler never sees volts.

use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use cpal::SupportedStreamConfigRange;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_MAX_SAMPLE_RATE_HZ, Gain, RAW_FULL_SCALE};
use crate::error::DriverError;

/// A scalar analog-to-digital converter.
pub trait AdcSource {
    /// Programs the conversion rate and gain. Called once at startup.
    fn configure(&mut self, sample_rate_hz: f64, gain: Gain) -> Result<(), DriverError>;

    /// Returns the latest conversion, blocking if none is available yet.
    fn read(&mut self) -> Result<i32, DriverError>;

    /// Discards one conversion; the first one after reconfiguring may still
    /// reflect the old settings.
    fn warm_up(&mut self) -> Result<(), DriverError> {
        self.read().map(|_| ())
    }

    /// Voltage corresponding to `raw_full_scale` counts at the current gain.
    fn reference_voltage(&self) -> f64;

    fn raw_full_scale(&self) -> i32 {
        RAW_FULL_SCALE
    }

    /// Highest rate `configure` will accept.
    fn max_sample_rate_hz(&self) -> f64 {
        DEFAULT_MAX_SAMPLE_RATE_HZ
    }

    /// Raw-to-volts conversion factor.
    fn volts_per_count(&self) -> f64 {
        self.reference_voltage() / self.raw_full_scale() as f64
    }
}

impl<A: AdcSource + ?Sized> AdcSource for Box<A> {
    fn configure(&mut self, sample_rate_hz: f64, gain: Gain) -> Result<(), DriverError> {
        (**self).configure(sample_rate_hz, gain)
    }

    fn read(&mut self) -> Result<i32, DriverError> {
        (**self).read()
    }

    fn warm_up(&mut self) -> Result<(), DriverError> {
        (**self).warm_up()
    }

    fn reference_voltage(&self) -> f64 {
        (**self).reference_voltage()
    }

    fn raw_full_scale(&self) -> i32 {
        (**self).raw_full_scale()
    }

    fn max_sample_rate_hz(&self) -> f64 {
        (**self).max_sample_rate_hz()
    }
}

/// Converts a voltage to raw counts at the given gain, saturating at the
/// converter's range.
pub fn volts_to_raw(volts: f64, gain: Gain) -> i32 {
    let raw = (volts / gain.full_scale_voltage() * RAW_FULL_SCALE as f64).round();
    raw.clamp(-(RAW_FULL_SCALE as f64) - 1.0, RAW_FULL_SCALE as f64) as i32
}

fn check_rate(sample_rate_hz: f64, max: f64) -> Result<(), DriverError> {
    if sample_rate_hz.is_finite() && sample_rate_hz > 0.0 && sample_rate_hz <= max {
        Ok(())
    } else {
        Err(DriverError::Unsupported(format!(
            "a rate of {sample_rate_hz} Hz (maximum {max} Hz)"
        )))
    }
}

/// A pure sine tone riding on a DC bias, sampled at exact instants.
///
/// Stands in for a single-ended ADC watching a clean signal: the output is
/// `offset + amplitude * sin(2π f n / rate)` volts, quantized to counts.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    frequency_hz: f64,
    amplitude_volts: f64,
    offset_volts: f64,
    sample_rate_hz: f64,
    gain: Gain,
    index: u64,
}

impl SyntheticSource {
    pub fn new(frequency_hz: f64, amplitude_volts: f64) -> Self {
        Self {
            frequency_hz,
            amplitude_volts,
            offset_volts: 0.0,
            sample_rate_hz: DEFAULT_MAX_SAMPLE_RATE_HZ,
            gain: Gain::One,
            index: 0,
        }
    }

    /// Adds a constant bias, as a single-ended input would see.
    pub fn with_offset(mut self, offset_volts: f64) -> Self {
        self.offset_volts = offset_volts;
        self
    }
}

impl AdcSource for SyntheticSource {
    fn configure(&mut self, sample_rate_hz: f64, gain: Gain) -> Result<(), DriverError> {
        check_rate(sample_rate_hz, self.max_sample_rate_hz())?;
        self.sample_rate_hz = sample_rate_hz;
        self.gain = gain;
        self.index = 0;
        Ok(())
    }

    fn read(&mut self) -> Result<i32, DriverError> {
        let t = self.index as f64 / self.sample_rate_hz;
        self.index += 1;
        let volts = self.offset_volts
            + self.amplitude_volts * (2.0 * std::f64::consts::PI * self.frequency_hz * t).sin();
        Ok(volts_to_raw(volts, self.gain))
    }

    fn reference_voltage(&self) -> f64 {
        self.gain.full_scale_voltage()
    }
}

/// One recorded value of a sample dump.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Recorded {
    /// Raw converter counts.
    Raw(i32),
    /// A reading already scaled to volts, converted back to counts at the
    /// configured gain when replayed.
    Volts(f64),
}

impl Recorded {
    fn parse(field: &str) -> Option<Self> {
        if let Ok(raw) = field.parse::<i32>() {
            return Some(Recorded::Raw(raw));
        }
        field
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(Recorded::Volts)
    }
}

/// Replays a saved dump of readings.
///
/// The dump is text: values separated by commas or whitespace, any number
/// per line. Everything after a `#` is ignored. Integer fields are raw
/// counts; fields with a fraction or exponent (`2.048`, `1.5e+00`) are
/// volts, as written by a capture script that saved scaled data. Once the
/// readings run out, every read fails with [`DriverError::Exhausted`].
#[derive(Debug, Clone)]
pub struct ReplaySource {
    readings: Vec<Recorded>,
    position: usize,
    gain: Gain,
}

impl ReplaySource {
    /// Replays raw counts from memory.
    pub fn new(readings: Vec<i32>) -> Self {
        Self::from_recorded(readings.into_iter().map(Recorded::Raw).collect())
    }

    fn from_recorded(readings: Vec<Recorded>) -> Self {
        Self {
            readings,
            position: 0,
            gain: Gain::One,
        }
    }

    /// Loads a dump file.
    ///
    /// # Errors
    /// * [`DriverError::Io`] if the file cannot be read
    /// * [`DriverError::Parse`] on the first field that is neither an
    ///   integer nor a finite number
    pub fn open(path: &Path) -> Result<Self, DriverError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    /// Parses a dump from any buffered reader. See [`ReplaySource::open`].
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, DriverError> {
        let mut readings = Vec::new();
        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            let content = line.split('#').next().unwrap_or("");
            for field in content
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|f| !f.is_empty())
            {
                let value = Recorded::parse(field).ok_or_else(|| DriverError::Parse {
                    line: number + 1,
                    value: field.to_string(),
                })?;
                readings.push(value);
            }
        }
        debug!("Loaded {} readings for replay", readings.len());
        Ok(Self::from_recorded(readings))
    }

    /// Readings not yet replayed.
    pub fn remaining(&self) -> usize {
        self.readings.len() - self.position
    }
}

impl AdcSource for ReplaySource {
    fn configure(&mut self, _sample_rate_hz: f64, gain: Gain) -> Result<(), DriverError> {
        self.gain = gain;
        Ok(())
    }

    fn read(&mut self) -> Result<i32, DriverError> {
        let value = *self
            .readings
            .get(self.position)
            .ok_or(DriverError::Exhausted)?;
        self.position += 1;
        Ok(match value {
            Recorded::Raw(raw) => raw,
            Recorded::Volts(volts) => volts_to_raw(volts, self.gain),
        })
    }

    /// Every recorded reading is real; nothing to discard.
    fn warm_up(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    fn reference_voltage(&self) -> f64 {
        self.gain.full_scale_voltage()
    }

    /// A dump may have been recorded at any rate.
    fn max_sample_rate_hz(&self) -> f64 {
        f64::INFINITY
    }
}

/// The default audio input device, used as a continuous-conversion ADC.
///
/// The stream callback keeps only the most recent conversion, so `read`
/// behaves like polling a free-running converter: reading twice between
/// conversions returns the same value. The device's full scale maps onto
/// the configured gain's full-scale voltage.
pub struct CpalAdc {
    device: cpal::Device,
    stream: Option<cpal::Stream>,
    latest: Arc<AtomicU32>,
    error_tx: Sender<String>,
    error_rx: Receiver<String>,
    gain: Gain,
    max_rate_hz: f64,
}

impl CpalAdc {
    /// Opens the default input device of the default host.
    pub fn open_default() -> Result<Self, DriverError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| DriverError::Unsupported("capture without an input device".into()))?;

        let name = device.name().unwrap_or_else(|_| "<unnamed>".to_string());
        info!("Using audio input device: {}", name);

        let max_rate_hz = device
            .supported_input_configs()
            .map_err(|e| DriverError::Stream(e.to_string()))?
            .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
            .map(|c| c.max_sample_rate().0 as f64)
            .fold(0.0, f64::max);

        let (error_tx, error_rx) = crossbeam_channel::bounded(16);
        Ok(Self {
            device,
            stream: None,
            latest: Arc::new(AtomicU32::new(0.0f32.to_bits())),
            error_tx,
            error_rx,
            gain: Gain::One,
            max_rate_hz,
        })
    }
}

impl AdcSource for CpalAdc {
    fn configure(&mut self, sample_rate_hz: f64, gain: Gain) -> Result<(), DriverError> {
        check_rate(sample_rate_hz, self.max_rate_hz)?;
        let target_rate = sample_rate_hz.round() as u32;

        let configs = self
            .device
            .supported_input_configs()
            .map_err(|e| DriverError::Stream(e.to_string()))?
            .collect::<Vec<_>>();
        let supported = find_supported_config(configs, target_rate).ok_or_else(|| {
            DriverError::Unsupported(format!("f32 capture at {target_rate} Hz"))
        })?;

        let config: cpal::StreamConfig = supported
            .with_sample_rate(cpal::SampleRate(target_rate))
            .into();
        let channels = config.channels as usize;
        info!("Selected sample rate: {} Hz, {} channel(s)", target_rate, channels);

        let latest = Arc::clone(&self.latest);
        let error_tx = self.error_tx.clone();
        let stream = self
            .device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    // Only the first channel of the last frame matters.
                    if let Some(frame) = data.chunks_exact(channels).last() {
                        latest.store(frame[0].to_bits(), Ordering::Relaxed);
                    }
                },
                move |err| {
                    let _ = error_tx.try_send(err.to_string());
                },
                None,
            )
            .map_err(|e| DriverError::Stream(e.to_string()))?;
        stream.play().map_err(|e| DriverError::Stream(e.to_string()))?;

        self.stream = Some(stream);
        self.gain = gain;
        Ok(())
    }

    fn read(&mut self) -> Result<i32, DriverError> {
        if self.stream.is_none() {
            return Err(DriverError::Unsupported("reading before configure".into()));
        }
        match self.error_rx.try_recv() {
            Ok(message) => {
                warn!("Input stream reported: {}", message);
                return Err(DriverError::Stream(message));
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => {
                return Err(DriverError::Stream("error channel closed".into()));
            }
        }
        let sample = f32::from_bits(self.latest.load(Ordering::Relaxed)) as f64;
        Ok(volts_to_raw(sample * self.gain.full_scale_voltage(), self.gain))
    }

    fn reference_voltage(&self) -> f64 {
        self.gain.full_scale_voltage()
    }

    fn max_sample_rate_hz(&self) -> f64 {
        self.max_rate_hz
    }
}

/// Picks the f32 input configuration whose rate range covers `target_rate`,
/// preferring fewer channels.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
        .filter(|c| c.min_sample_rate().0 <= target_rate && target_rate <= c.max_sample_rate().0)
        .min_by_key(|c| c.channels())
}
