// pitch-core/src/lib.rs

//! The core logic for the ADC pitch monitor.
//! This crate samples a signal at a fixed rate, finds its dominant
//! frequency with an FFT and names the nearest musical note. It is
//! completely headless; display and LED output go through narrow sink
//! traits.

pub mod adc;
pub mod clock;
pub mod config;
pub mod display;
pub mod error;
pub mod fft;
pub mod pipeline;
pub mod sampler;
pub mod tuning;

pub use config::{Gain, MonitorConfig, SamplingConfig};
pub use error::{AcquisitionError, ConfigurationError, DriverError, RenderError};
pub use pipeline::{Pipeline, RunSummary, StopReason};

/// The strongest bin of one frame's spectrum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchEstimate {
    /// Bin centre frequency in Hz.
    pub frequency_hz: f64,
    /// Magnitude of the FFT coefficient (volts times samples).
    pub magnitude: f64,
}

/// The externally visible output of one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteResult {
    /// The name of the nearest note, e.g. "A3". `None` when no note could
    /// be resolved.
    pub note_name: Option<String>,
    /// The detected frequency in Hz.
    pub frequency_hz: f64,
}
