//! # Fast Fourier Transform (FFT) Module
//!
//! Turns one frame of raw readings into a single dominant-frequency
//! estimate.
//!
//! ## Processing steps
//! 1. Scale raw counts to volts
//! 2. DC offset removal (zero-centering)
//! 3. Forward FFT using RustFFT, magnitude of every coefficient
//! 4. Keep the single-sided half of the spectrum
//! 5. Pick the bin of maximum magnitude
//!
//! The bin spacing `sample_rate / sample_count` is the precision floor of
//! the estimate; no interpolation is applied.

use std::sync::Arc;

use rustfft::{Fft, FftPlanner, num_complex::Complex};

use crate::PitchEstimate;
use crate::config::SamplingConfig;
use crate::sampler::Frame;

/// Converts raw readings to volts with a fixed ratio.
fn scale_to_volts(frame: &Frame, volts_per_count: f64) -> Vec<f64> {
    frame
        .raw_values()
        .map(|raw| raw as f64 * volts_per_count)
        .collect()
}

/// Removes the DC offset from a signal by making its average value zero.
///
/// A single-ended ADC reads a biased signal; without this step the 0 Hz bin
/// would dominate the spectrum.
fn remove_dc_offset(signal: &mut [f64]) {
    let len = signal.len();
    if len == 0 {
        return;
    }
    let avg = signal.iter().sum::<f64>() / len as f64;
    for sample in signal.iter_mut() {
        *sample -= avg;
    }
}

/// Keeps the magnitudes of the first half of a real signal's spectrum. The
/// upper half mirrors it.
pub fn spectrum_to_magnitudes(spectrum: &[Complex<f64>]) -> Vec<f64> {
    spectrum
        .iter()
        .take(spectrum.len() / 2)
        .map(|c| c.norm()) // .norm() is sqrt(re^2 + im^2)
        .collect()
}

/// One frequency slot of a single-sided spectrum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectrumBin {
    pub frequency_hz: f64,
    pub magnitude: f64,
}

/// Single-sided magnitude spectrum of one frame: `sample_count / 2` bins
/// from 0 Hz upward.
#[derive(Debug, Clone)]
pub struct Spectrum {
    bins: Vec<SpectrumBin>,
}

impl Spectrum {
    pub fn bins(&self) -> &[SpectrumBin] {
        &self.bins
    }

    /// The bin of maximum magnitude. Ties go to the lowest frequency.
    pub fn peak(&self) -> PitchEstimate {
        let mut best = self.bins[0];
        for bin in &self.bins[1..] {
            if bin.magnitude > best.magnitude {
                best = *bin;
            }
        }
        PitchEstimate {
            frequency_hz: best.frequency_hz,
            magnitude: best.magnitude,
        }
    }
}

/// FFT peak extractor for a fixed frame geometry. The FFT plan is built
/// once and reused for every frame.
pub struct SpectralAnalyzer {
    sample_count: usize,
    sample_rate_hz: f64,
    fft: Arc<dyn Fft<f64>>,
}

impl SpectralAnalyzer {
    /// Plans the FFT for `config.sample_count` points.
    pub fn new(config: &SamplingConfig) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(config.sample_count);
        Self {
            sample_count: config.sample_count,
            sample_rate_hz: config.sample_rate_hz,
            fft,
        }
    }

    /// Centre frequency of bin `k`.
    pub fn bin_frequency(&self, k: usize) -> f64 {
        k as f64 * self.sample_rate_hz / self.sample_count as f64
    }

    /// Computes the single-sided magnitude spectrum of `frame`.
    ///
    /// # Panics
    /// * If the frame does not hold exactly `sample_count` readings
    pub fn spectrum(&self, frame: &Frame, volts_per_count: f64) -> Spectrum {
        assert_eq!(
            frame.len(),
            self.sample_count,
            "frame length must equal the configured sample count"
        );

        let mut volts = scale_to_volts(frame, volts_per_count);
        remove_dc_offset(&mut volts);

        let mut buffer: Vec<Complex<f64>> = volts
            .into_iter()
            .map(|v| Complex { re: v, im: 0.0 })
            .collect();
        self.fft.process(&mut buffer);

        let bins = spectrum_to_magnitudes(&buffer)
            .into_iter()
            .enumerate()
            .map(|(k, magnitude)| SpectrumBin {
                frequency_hz: self.bin_frequency(k),
                magnitude,
            })
            .collect();
        Spectrum { bins }
    }

    /// Consumes a frame and returns its dominant frequency.
    ///
    /// The frame is scaled to volts, zero-centered and transformed; the
    /// strongest bin of the single-sided spectrum wins.
    ///
    /// # Arguments
    /// * `frame` - Exactly `sample_count` readings taken at `sample_rate_hz`
    /// * `volts_per_count` - Raw-to-volts factor of the ADC that produced it
    ///
    /// # Returns
    /// The centre frequency and magnitude of the peak bin. A silent or
    /// constant frame reports 0 Hz.
    ///
    /// # Panics
    /// * If the frame does not hold exactly `sample_count` readings
    pub fn analyze(&self, frame: Frame, volts_per_count: f64) -> PitchEstimate {
        self.spectrum(&frame, volts_per_count).peak()
    }
}
