use std::cell::RefCell;
use std::io::Cursor;
use std::rc::Rc;
use std::time::Duration;

use pitch_core::adc::{AdcSource, ReplaySource, SyntheticSource, volts_to_raw};
use pitch_core::clock::{CancelToken, Clock, SimulatedClock};
use pitch_core::config::{Gain, MonitorConfig, SamplingConfig, StripConfig};
use pitch_core::display::{DisplaySink, IlluminationSink, Rgb};
use pitch_core::{ConfigurationError, DriverError, Pipeline, RenderError, StopReason};

/// Display that remembers every line written to it.
#[derive(Clone, Default)]
struct RecordingDisplay {
    lines: Rc<RefCell<Vec<(usize, String)>>>,
    fail: bool,
}

impl DisplaySink for RecordingDisplay {
    fn clear(&mut self) -> Result<(), RenderError> {
        if self.fail {
            return Err(RenderError::Io(std::io::Error::other("display unplugged")));
        }
        Ok(())
    }

    fn write_line(&mut self, row: usize, text: &str, _width: usize) -> Result<(), RenderError> {
        self.lines.borrow_mut().push((row, text.to_string()));
        Ok(())
    }
}

/// Strip that remembers the frame it was last flushed with.
#[derive(Clone)]
struct RecordingStrip {
    pending: Rc<RefCell<Vec<Rgb>>>,
    flushed: Rc<RefCell<Vec<Vec<Rgb>>>>,
}

impl RecordingStrip {
    fn new(len: usize) -> Self {
        Self {
            pending: Rc::new(RefCell::new(vec![Rgb::OFF; len])),
            flushed: Rc::new(RefCell::new(Vec::new())),
        }
    }
}

impl IlluminationSink for RecordingStrip {
    fn len(&self) -> usize {
        self.pending.borrow().len()
    }

    fn set_pixel(&mut self, index: usize, color: Rgb) -> Result<(), RenderError> {
        self.pending.borrow_mut()[index] = color;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), RenderError> {
        let frame = self.pending.borrow().clone();
        self.flushed.borrow_mut().push(frame);
        Ok(())
    }
}

/// Wraps a source and fails partway through every second frame attempt.
struct FlakySource {
    inner: SyntheticSource,
    frame: usize,
    reads_in_frame: usize,
    frame_len: usize,
    fail_at: usize,
}

impl AdcSource for FlakySource {
    fn configure(&mut self, rate: f64, gain: Gain) -> Result<(), DriverError> {
        self.inner.configure(rate, gain)
    }

    fn read(&mut self) -> Result<i32, DriverError> {
        let position = self.reads_in_frame;
        self.reads_in_frame += 1;
        if self.frame % 2 == 1 && position == self.fail_at {
            self.frame += 1;
            self.reads_in_frame = 0;
            return Err(DriverError::Stream("bus error".into()));
        }
        if self.reads_in_frame == self.frame_len {
            self.frame += 1;
            self.reads_in_frame = 0;
        }
        self.inner.read()
    }

    fn warm_up(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    fn reference_voltage(&self) -> f64 {
        self.inner.reference_voltage()
    }
}

/// Cancels the token after a number of reads, like an interrupt arriving
/// mid-frame.
struct InterruptingSource {
    reads: usize,
    cancel_after: usize,
    cancel: CancelToken,
}

impl AdcSource for InterruptingSource {
    fn configure(&mut self, _: f64, _: Gain) -> Result<(), DriverError> {
        Ok(())
    }

    fn read(&mut self) -> Result<i32, DriverError> {
        self.reads += 1;
        if self.reads == self.cancel_after {
            self.cancel.cancel();
        }
        Ok(0)
    }

    fn warm_up(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    fn reference_voltage(&self) -> f64 {
        4.096
    }
}

fn test_config() -> MonitorConfig {
    MonitorConfig {
        strip: Some(StripConfig {
            pixels: 8,
            ceiling_hz: 430.0,
        }),
        ..MonitorConfig::default()
    }
}

fn a3_source() -> SyntheticSource {
    SyntheticSource::new(220.0, 1.0).with_offset(2.0)
}

fn start<A: AdcSource>(
    config: &MonitorConfig,
    source: A,
    display: RecordingDisplay,
) -> Result<Pipeline<A, SimulatedClock>, ConfigurationError> {
    Pipeline::new(config, source, SimulatedClock::new(), Box::new(display))
}

#[test]
fn detects_a3_from_220hz_sine() {
    let config = test_config();
    let display = RecordingDisplay::default();
    let mut pipeline = start(&config, a3_source(), display.clone()).unwrap();

    let output = pipeline.run_cycle(&CancelToken::new()).unwrap();
    let bin_width = config.sampling.bin_width_hz();
    assert!((output.estimate.frequency_hz - 220.0).abs() <= bin_width);
    assert_eq!(output.result.note_name.as_deref(), Some("A3"));
    assert_eq!(output.render_errors, 0);

    let lines = display.lines.borrow();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], (0, "A3              ".to_string()));
    assert_eq!(lines[1], (1, "220.0 Hz        ".to_string()));
}

#[test]
fn frame_takes_sample_count_periods() {
    let config = test_config();
    let mut pipeline = start(&config, a3_source(), RecordingDisplay::default()).unwrap();

    pipeline.run_cycle(&CancelToken::new()).unwrap();
    let expected = config.sampling.period() * 512;
    assert_eq!(pipeline.clock().now(), expected);
}

#[test]
fn bounded_run_publishes_results_in_order() {
    let config = test_config();
    let (tx, rx) = crossbeam_channel::unbounded();
    let mut pipeline = start(&config, a3_source(), RecordingDisplay::default())
        .unwrap()
        .with_publisher(tx);

    let summary = pipeline.run(&CancelToken::new(), Some(3));
    assert_eq!(summary.completed, 3);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.stop, StopReason::CycleLimit);

    let results: Vec<_> = rx.try_iter().collect();
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.note_name.as_deref() == Some("A3")));

    // Three frames and the two pauses between them.
    let frames = config.sampling.period() * 512 * 3;
    assert_eq!(pipeline.clock().now(), frames + Duration::from_millis(400));
}

#[test]
fn failed_acquisition_skips_cycle_and_continues() {
    let config = test_config();
    let source = FlakySource {
        inner: a3_source(),
        frame: 0,
        reads_in_frame: 0,
        frame_len: 512,
        fail_at: 100,
    };
    let display = RecordingDisplay::default();
    let mut pipeline = start(&config, source, display.clone()).unwrap();

    let summary = pipeline.run(&CancelToken::new(), Some(4));
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.stop, StopReason::CycleLimit);
    // Only completed cycles reach the display.
    assert_eq!(display.lines.borrow().len(), 4);
}

#[test]
fn render_failures_never_stop_acquisition() {
    let config = test_config();
    let display = RecordingDisplay {
        fail: true,
        ..RecordingDisplay::default()
    };
    let mut pipeline = start(&config, a3_source(), display).unwrap();

    let summary = pipeline.run(&CancelToken::new(), Some(3));
    assert_eq!(summary.completed, 3);
    assert_eq!(summary.render_errors, 3);
}

#[test]
fn replay_stops_at_end_of_input() {
    let config = test_config();
    let readings: Vec<String> = (0..1280)
        .map(|n| {
            let t = n as f64 / 860.0;
            let volts = 2.0 + (2.0 * std::f64::consts::PI * 220.0 * t).sin();
            volts_to_raw(volts, Gain::One).to_string()
        })
        .collect();
    let dump = readings.join("\n");
    let source = ReplaySource::from_reader(Cursor::new(dump)).unwrap();

    let (tx, rx) = crossbeam_channel::unbounded();
    let mut pipeline = start(&config, source, RecordingDisplay::default())
        .unwrap()
        .with_publisher(tx);

    let summary = pipeline.run(&CancelToken::new(), None);
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.stop, StopReason::EndOfInput);
    assert!(rx.try_iter().all(|r| r.note_name.as_deref() == Some("A3")));
}

#[test]
fn replay_of_voltage_dump_detects_a3() {
    let config = test_config();
    let volts: Vec<String> = (0..512)
        .map(|n| {
            let t = n as f64 / 860.0;
            format!("{:.18e}", 2.0 + (2.0 * std::f64::consts::PI * 220.0 * t).sin())
        })
        .collect();
    let dump = volts.join("\n");
    let source = ReplaySource::from_reader(Cursor::new(dump)).unwrap();

    let mut pipeline = start(&config, source, RecordingDisplay::default()).unwrap();
    let output = pipeline.run_cycle(&CancelToken::new()).unwrap();
    assert_eq!(output.result.note_name.as_deref(), Some("A3"));
}

#[test]
fn strip_shows_level_and_is_switched_off_on_shutdown() {
    let config = test_config();
    let strip = RecordingStrip::new(8);
    let mut pipeline = start(&config, a3_source(), RecordingDisplay::default())
        .unwrap()
        .with_strip(Box::new(strip.clone()));

    pipeline.run_cycle(&CancelToken::new()).unwrap();
    {
        let flushed = strip.flushed.borrow();
        // 220 of 430 Hz lights 4 of 8 pixels.
        let lit = flushed[0].iter().filter(|c| **c != Rgb::OFF).count();
        assert_eq!(lit, 4);
    }

    pipeline.shutdown();
    let flushed = strip.flushed.borrow();
    assert_eq!(flushed.len(), 2);
    assert!(flushed[1].iter().all(|c| *c == Rgb::OFF));
}

#[test]
fn cancellation_before_start_runs_nothing() {
    let config = test_config();
    let cancel = CancelToken::new();
    cancel.cancel();
    let mut pipeline = start(&config, a3_source(), RecordingDisplay::default()).unwrap();

    let summary = pipeline.run(&cancel, None);
    assert_eq!(summary.completed, 0);
    assert_eq!(summary.stop, StopReason::Cancelled);
    assert_eq!(pipeline.clock().now(), Duration::ZERO);
}

#[test]
fn cancellation_mid_frame_stops_within_one_period() {
    let config = test_config();
    let cancel = CancelToken::new();
    let source = InterruptingSource {
        reads: 0,
        cancel_after: 100,
        cancel: cancel.clone(),
    };
    let display = RecordingDisplay::default();
    let mut pipeline = start(&config, source, display.clone()).unwrap();

    let summary = pipeline.run(&cancel, None);
    assert_eq!(summary.completed, 0);
    assert_eq!(summary.stop, StopReason::Cancelled);
    assert_eq!(pipeline.clock().now(), config.sampling.period() * 100);
    assert!(display.lines.borrow().is_empty());
}

#[test]
fn invalid_configuration_never_starts() {
    let mut config = test_config();
    config.sampling = SamplingConfig {
        sample_count: 500,
        ..SamplingConfig::default()
    };
    let err = start(&config, a3_source(), RecordingDisplay::default())
        .err()
        .unwrap();
    assert!(matches!(err, ConfigurationError::SampleCountNotPowerOfTwo(500)));

    let mut config = test_config();
    config.sampling.sample_rate_hz = 1000.0;
    let err = start(&config, a3_source(), RecordingDisplay::default())
        .err()
        .unwrap();
    assert!(matches!(err, ConfigurationError::RateExceedsMaximum { .. }));
}
