//! # Pipeline Module
//!
//! The acquisition run loop: sample, analyze, quantize, emit, pause,
//! repeat. Everything runs on the calling thread, one frame at a time, so
//! results are always emitted in acquisition order and the next frame is
//! not started before the previous result has been rendered.
//!
//! ## Failure policy
//! - Acquisition errors skip the cycle; nothing is rendered and the loop
//!   retries after the pause. End of input stops the loop.
//! - Render errors are logged and counted; they never stop acquisition.
//! - Configuration errors are returned from [`Pipeline::new`]; the loop
//!   never starts with an invalid configuration.

use std::time::Duration;

use crossbeam_channel::Sender;
use tracing::{debug, info, warn};

use crate::adc::AdcSource;
use crate::clock::{CancelToken, Clock, idle_for};
use crate::config::{MonitorConfig, StripConfig};
use crate::display::{self, DisplaySink, IlluminationGuard, IlluminationSink};
use crate::error::{AcquisitionError, ConfigurationError};
use crate::fft::SpectralAnalyzer;
use crate::sampler::Sampler;
use crate::tuning::NoteQuantizer;
use crate::{NoteResult, PitchEstimate};

/// Why [`Pipeline::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    CycleLimit,
    EndOfInput,
}

/// Counters for one call to [`Pipeline::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Cycles that produced a result.
    pub completed: u64,
    /// Cycles abandoned because acquisition failed.
    pub skipped: u64,
    /// Failed writes to the display or illumination sinks.
    pub render_errors: u64,
    pub stop: StopReason,
}

/// Everything one successful cycle produced.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleOutput {
    pub estimate: PitchEstimate,
    pub result: NoteResult,
    pub render_errors: u64,
}

struct Strip {
    guard: IlluminationGuard<Box<dyn IlluminationSink>>,
    config: StripConfig,
}

/// Owns the ADC, the sinks and the processing stages for the lifetime of
/// the run. Dropping the pipeline switches the illumination off.
pub struct Pipeline<A: AdcSource, C: Clock> {
    adc: A,
    sampler: Sampler<C>,
    analyzer: SpectralAnalyzer,
    quantizer: NoteQuantizer,
    display: Box<dyn DisplaySink>,
    display_cols: usize,
    strip_config: Option<StripConfig>,
    strip: Option<Strip>,
    cycle_pause: Duration,
    publisher: Option<Sender<NoteResult>>,
}

impl<A: AdcSource, C: Clock> Pipeline<A, C> {
    /// Validates `config` against the ADC, programs the ADC and takes one
    /// warm-up reading.
    pub fn new(
        config: &MonitorConfig,
        mut adc: A,
        clock: C,
        display: Box<dyn DisplaySink>,
    ) -> Result<Self, ConfigurationError> {
        config.validate(adc.max_sample_rate_hz())?;
        let sampling = config.sampling;
        adc.configure(sampling.sample_rate_hz, sampling.gain)?;

        if let Err(e) = adc.warm_up() {
            warn!("Warm-up read failed: {}", e);
        }

        info!(
            "Sampling {} points at {} sps (approx. {:.2} seconds window, {:.3} Hz per bin)",
            sampling.sample_count,
            sampling.sample_rate_hz,
            sampling.frame_duration().as_secs_f64(),
            sampling.bin_width_hz()
        );

        Ok(Self {
            adc,
            sampler: Sampler::new(sampling, clock),
            analyzer: SpectralAnalyzer::new(&sampling),
            quantizer: NoteQuantizer::new(config.quantizer),
            display,
            display_cols: config.display.cols,
            strip_config: config.strip,
            strip: None,
            cycle_pause: config.cycle_pause(),
            publisher: None,
        })
    }

    /// Attaches an LED strip. Its geometry comes from the configuration's
    /// strip section, or from the sink itself when that section is absent.
    pub fn with_strip(mut self, sink: Box<dyn IlluminationSink>) -> Self {
        let config = self.strip_config.unwrap_or(StripConfig {
            pixels: sink.len(),
            ..StripConfig::default()
        });
        self.strip = Some(Strip {
            guard: IlluminationGuard::new(sink),
            config,
        });
        self
    }

    /// Publishes every result on `sender`, in acquisition order.
    pub fn with_publisher(mut self, sender: Sender<NoteResult>) -> Self {
        self.publisher = Some(sender);
        self
    }

    pub fn clock(&self) -> &C {
        self.sampler.clock()
    }

    /// Runs one sample-analyze-quantize-emit cycle.
    pub fn run_cycle(&mut self, cancel: &CancelToken) -> Result<CycleOutput, AcquisitionError> {
        let frame = self.sampler.acquire(&mut self.adc, cancel)?;
        let estimate = self.analyzer.analyze(frame, self.adc.volts_per_count());
        let result = self.quantizer.quantize(estimate.frequency_hz);

        info!(
            "Detected: {:.1} Hz -> {}",
            result.frequency_hz,
            result.note_name.as_deref().unwrap_or(display::NO_NOTE)
        );
        debug!("Peak magnitude {:.4}", estimate.magnitude);

        let render_errors = self.emit(&result);
        Ok(CycleOutput {
            estimate,
            result,
            render_errors,
        })
    }

    /// Renders and publishes `result`, returning how many sink writes
    /// failed.
    fn emit(&mut self, result: &NoteResult) -> u64 {
        let mut failures = 0;

        if let Err(e) = display::show_result(self.display.as_mut(), result, self.display_cols) {
            warn!("Display update failed: {}", e);
            failures += 1;
        }

        if let Some(strip) = &mut self.strip {
            let sink = strip.guard.sink_mut();
            if let Err(e) = display::show_level(sink, result.frequency_hz, &strip.config) {
                warn!("Illumination update failed: {}", e);
                failures += 1;
            }
        }

        let receiver_gone = self
            .publisher
            .as_ref()
            .is_some_and(|sender| sender.send(result.clone()).is_err());
        if receiver_gone {
            debug!("Result receiver dropped, no longer publishing");
            self.publisher = None;
        }

        failures
    }

    /// Runs cycles until `cancel` is set, the input ends, or `max_cycles`
    /// cycles (completed or skipped) have run.
    ///
    /// A failed acquisition skips its cycle and the loop carries on after
    /// the usual pause. Render failures are counted but never stop the
    /// loop.
    ///
    /// # Arguments
    /// * `cancel` - Stops the loop within about one sample period
    /// * `max_cycles` - Upper bound on attempted cycles; `None` runs until
    ///   cancelled or out of input
    ///
    /// # Returns
    /// Counters for the run and the reason it stopped.
    pub fn run(&mut self, cancel: &CancelToken, max_cycles: Option<u64>) -> RunSummary {
        let mut summary = RunSummary {
            completed: 0,
            skipped: 0,
            render_errors: 0,
            stop: StopReason::Cancelled,
        };

        loop {
            if cancel.is_cancelled() {
                summary.stop = StopReason::Cancelled;
                break;
            }

            match self.run_cycle(cancel) {
                Ok(output) => {
                    summary.completed += 1;
                    summary.render_errors += output.render_errors;
                }
                Err(AcquisitionError::Interrupted { collected }) => {
                    debug!("Frame abandoned after {} samples", collected);
                    summary.stop = StopReason::Cancelled;
                    break;
                }
                Err(e) if e.is_end_of_input() => {
                    info!("Input exhausted");
                    summary.stop = StopReason::EndOfInput;
                    break;
                }
                Err(e) => {
                    warn!("Skipping cycle: {}", e);
                    summary.skipped += 1;
                }
            }

            if max_cycles.is_some_and(|max| summary.completed + summary.skipped >= max) {
                summary.stop = StopReason::CycleLimit;
                break;
            }

            if !idle_for(self.sampler.clock(), self.cycle_pause, cancel) {
                summary.stop = StopReason::Cancelled;
                break;
            }
        }

        info!(
            "Stopped ({:?}): {} cycles completed, {} skipped, {} render errors",
            summary.stop, summary.completed, summary.skipped, summary.render_errors
        );
        summary
    }

    /// Releases the hardware. The illumination is switched off before this
    /// returns.
    pub fn shutdown(self) {
        info!("Shutting down pipeline");
        drop(self);
    }
}
