//! # Configuration Module
//!
//! Startup configuration for the pitch monitor. Everything here is created
//! once, validated once and never mutated while the pipeline runs.
//!
//! Configuration can be loaded from a JSON file. Every field has a default,
//! so a partial file (or no file at all) is valid:
//!
//! ```json
//! { "sampling": { "sample_count": 1024, "sample_rate_hz": 860.0, "gain": "two" } }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigurationError;

/// Maximum conversion rate of an ADS1115-class converter, in samples/s.
pub const DEFAULT_MAX_SAMPLE_RATE_HZ: f64 = 860.0;

/// Largest raw reading of a 16-bit signed converter.
pub const RAW_FULL_SCALE: i32 = 32767;

/// Programmable gain of the converter front end.
///
/// Each step selects the full-scale input voltage; the raw range stays
/// `±RAW_FULL_SCALE`, so higher gain means finer volts per count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gain {
    /// ±6.144 V
    TwoThirds,
    /// ±4.096 V
    #[default]
    One,
    /// ±2.048 V
    Two,
    /// ±1.024 V
    Four,
    /// ±0.512 V
    Eight,
    /// ±0.256 V
    Sixteen,
}

impl Gain {
    /// Full-scale input voltage for this gain step.
    pub fn full_scale_voltage(self) -> f64 {
        match self {
            Gain::TwoThirds => 6.144,
            Gain::One => 4.096,
            Gain::Two => 2.048,
            Gain::Four => 1.024,
            Gain::Eight => 0.512,
            Gain::Sixteen => 0.256,
        }
    }
}

impl std::str::FromStr for Gain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "2/3" | "two_thirds" => Ok(Gain::TwoThirds),
            "1" | "one" => Ok(Gain::One),
            "2" | "two" => Ok(Gain::Two),
            "4" | "four" => Ok(Gain::Four),
            "8" | "eight" => Ok(Gain::Eight),
            "16" | "sixteen" => Ok(Gain::Sixteen),
            other => Err(format!("unknown gain '{other}', expected one of 2/3, 1, 2, 4, 8, 16")),
        }
    }
}

/// Frame geometry and acquisition rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Readings per frame. Must be a power of two.
    pub sample_count: usize,
    /// Acquisition rate in Hz.
    pub sample_rate_hz: f64,
    pub gain: Gain,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            sample_count: 512,
            sample_rate_hz: 860.0,
            gain: Gain::One,
        }
    }
}

impl SamplingConfig {
    /// Checks the frame geometry and that `sample_rate_hz` does not exceed
    /// `max_rate_hz`.
    pub fn validate(&self, max_rate_hz: f64) -> Result<(), ConfigurationError> {
        if self.sample_count < 2 || !self.sample_count.is_power_of_two() {
            return Err(ConfigurationError::SampleCountNotPowerOfTwo(self.sample_count));
        }
        if !self.sample_rate_hz.is_finite() || self.sample_rate_hz <= 0.0 {
            return Err(ConfigurationError::InvalidSampleRate(self.sample_rate_hz));
        }
        if self.sample_rate_hz > max_rate_hz {
            return Err(ConfigurationError::RateExceedsMaximum {
                requested: self.sample_rate_hz,
                max: max_rate_hz,
            });
        }
        Ok(())
    }

    /// Time between two scheduled readings.
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.sample_rate_hz)
    }

    /// Spacing of FFT bins in Hz; the precision floor of the detector.
    pub fn bin_width_hz(&self) -> f64 {
        self.sample_rate_hz / self.sample_count as f64
    }

    /// Wall-clock length of one frame.
    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs_f64(self.sample_count as f64 / self.sample_rate_hz)
    }
}

/// Parameters of the frequency-to-note mapping.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantizerConfig {
    /// Maximum distance, in semitones, from the nearest tempered note.
    pub semitone_tolerance: f64,
    /// Lowest accepted frequency (inclusive).
    pub min_hz: f64,
    /// Highest accepted frequency (inclusive).
    pub max_hz: f64,
}

impl Default for QuantizerConfig {
    fn default() -> Self {
        Self {
            semitone_tolerance: 0.5,
            min_hz: 100.0,
            max_hz: 440.0,
        }
    }
}

impl QuantizerConfig {
    /// Checks that the tolerance lies in `[0, 0.5]` and that the band is
    /// non-empty and positive.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !(0.0..=0.5).contains(&self.semitone_tolerance) {
            return Err(ConfigurationError::InvalidTolerance(self.semitone_tolerance));
        }
        if !(self.min_hz > 0.0 && self.min_hz <= self.max_hz && self.max_hz.is_finite()) {
            return Err(ConfigurationError::InvalidBand {
                min_hz: self.min_hz,
                max_hz: self.max_hz,
            });
        }
        Ok(())
    }
}

/// Character display geometry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub rows: usize,
    pub cols: usize,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self { rows: 2, cols: 16 }
    }
}

/// Addressable LED strip used as a frequency level bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StripConfig {
    pub pixels: usize,
    /// Frequency that lights the whole strip.
    pub ceiling_hz: f64,
}

impl Default for StripConfig {
    fn default() -> Self {
        Self {
            pixels: 144,
            ceiling_hz: 430.0,
        }
    }
}

/// Top-level configuration of the monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub sampling: SamplingConfig,
    pub quantizer: QuantizerConfig,
    pub display: DisplayConfig,
    pub strip: Option<StripConfig>,
    /// Pause after each emitted result, for display legibility.
    pub cycle_pause_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sampling: SamplingConfig::default(),
            quantizer: QuantizerConfig::default(),
            display: DisplayConfig::default(),
            strip: Some(StripConfig::default()),
            cycle_pause_ms: 200,
        }
    }
}

impl MonitorConfig {
    /// Loads a configuration from a JSON file. Missing fields keep their
    /// defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Parses a configuration from JSON text. Missing fields keep their
    /// defaults.
    pub fn from_json(text: &str) -> Result<Self, ConfigurationError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Validates every section against an ADC that converts at most
    /// `max_rate_hz` samples per second. The pipeline must not start unless
    /// this returns `Ok`.
    pub fn validate(&self, max_rate_hz: f64) -> Result<(), ConfigurationError> {
        self.sampling.validate(max_rate_hz)?;
        self.quantizer.validate()?;
        if self.display.rows < 2 || self.display.cols == 0 {
            return Err(ConfigurationError::InvalidDisplay {
                rows: self.display.rows,
                cols: self.display.cols,
            });
        }
        if let Some(strip) = &self.strip {
            if strip.pixels == 0 || strip.ceiling_hz.is_nan() || strip.ceiling_hz <= 0.0 {
                return Err(ConfigurationError::InvalidStrip);
            }
        }
        Ok(())
    }

    pub fn cycle_pause(&self) -> Duration {
        Duration::from_millis(self.cycle_pause_ms)
    }
}
