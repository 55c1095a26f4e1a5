//! # Error Module
//!
//! Error types for the acquisition pipeline. Failures only originate at the
//! hardware boundary (ADC source, display and illumination sinks) or at
//! startup (configuration); analysis and quantization never fail on a
//! well-formed frame.

use thiserror::Error;

/// Failure reported by an ADC collaborator.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("ADC does not support {0}")]
    Unsupported(String),

    #[error("input stream error: {0}")]
    Stream(String),

    #[error("sample source has no more readings")]
    Exhausted,

    #[error("malformed reading {value:?} on line {line}")]
    Parse { line: usize, value: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The current frame could not be completed. No partial frame is ever
/// handed downstream when one of these is returned.
#[derive(Error, Debug)]
pub enum AcquisitionError {
    #[error("ADC read failed at sample {index}: {source}")]
    Driver {
        index: usize,
        #[source]
        source: DriverError,
    },

    #[error("ADC returned out-of-range value {value} at sample {index}")]
    InvalidReading { index: usize, value: i32 },

    #[error("acquisition interrupted after {collected} samples")]
    Interrupted { collected: usize },
}

impl AcquisitionError {
    /// True when the source ran dry, e.g. a replayed dump reached its end.
    pub fn is_end_of_input(&self) -> bool {
        matches!(
            self,
            AcquisitionError::Driver {
                source: DriverError::Exhausted,
                ..
            }
        )
    }
}

/// Invalid startup configuration. Always fatal.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("sample count {0} is not a power of two (minimum 2)")]
    SampleCountNotPowerOfTwo(usize),

    #[error("sample rate {0} Hz must be a positive, finite number")]
    InvalidSampleRate(f64),

    #[error("sample rate {requested} Hz exceeds the ADC maximum of {max} Hz")]
    RateExceedsMaximum { requested: f64, max: f64 },

    #[error("semitone tolerance {0} must lie within [0, 0.5]")]
    InvalidTolerance(f64),

    #[error("accepted band {min_hz}..={max_hz} Hz is empty or non-positive")]
    InvalidBand { min_hz: f64, max_hz: f64 },

    #[error("display geometry {rows}x{cols} needs at least 2 rows and 1 column")]
    InvalidDisplay { rows: usize, cols: usize },

    #[error("illumination strip needs at least one pixel and a positive ceiling")]
    InvalidStrip,

    #[error("ADC rejected configuration: {0}")]
    Driver(#[from] DriverError),

    #[error("could not read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A display or illumination sink could not be written.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("row {row} is outside a display with {rows} rows")]
    RowOutOfRange { row: usize, rows: usize },

    #[error("pixel {index} is outside a strip of {len} pixels")]
    PixelOutOfRange { index: usize, len: usize },

    #[error("sink write failed: {0}")]
    Io(#[from] std::io::Error),
}
