//! # Sampler Module
//!
//! Fixed-rate acquisition of one frame of raw ADC readings. Pacing comes
//! from a [`DeadlineScheduler`] polling the sampler's clock; no interrupt
//! timers are involved. The sampler holds the processor for the whole
//! frame to keep jitter low, but checks for cancellation at every slot.

use std::time::Duration;

use crate::adc::AdcSource;
use crate::clock::{CancelToken, Clock, DeadlineScheduler};
use crate::config::SamplingConfig;
use crate::error::AcquisitionError;

/// One raw reading and the instant it was scheduled for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub raw: i32,
    pub at: Duration,
}

/// A complete, immutable batch of readings taken at a uniform rate.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    samples: Vec<Sample>,
}

impl Frame {
    /// Builds a frame from readings assumed to be `period` apart, starting
    /// one period after zero.
    pub fn from_raw(readings: impl IntoIterator<Item = i32>, period: Duration) -> Self {
        let samples = readings
            .into_iter()
            .zip(1u32..)
            .map(|(raw, k)| Sample { raw, at: period * k })
            .collect();
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn raw_values(&self) -> impl Iterator<Item = i32> + '_ {
        self.samples.iter().map(|s| s.raw)
    }
}

/// Drives the acquisition loop for one frame at a time.
pub struct Sampler<C: Clock> {
    config: SamplingConfig,
    clock: C,
}

impl<C: Clock> Sampler<C> {
    /// Creates a sampler pacing frames of `config` with `clock`. The
    /// configuration is assumed to be validated.
    pub fn new(config: SamplingConfig, clock: C) -> Self {
        Self { config, clock }
    }

    pub fn config(&self) -> &SamplingConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Acquires exactly `sample_count` readings from `adc`.
    ///
    /// The first reading is due one period after the call; each following
    /// deadline is the previous one plus one period. Either a full frame is
    /// returned or an error; a partially filled frame is dropped here.
    ///
    /// # Arguments
    /// * `adc` - A configured source; read once per deadline
    /// * `cancel` - Checked at every slot while waiting
    ///
    /// # Returns
    /// * `Ok(frame)` - `sample_count` readings tagged with their deadlines
    /// * `Err(AcquisitionError::Driver)` - The source failed or ran dry
    /// * `Err(AcquisitionError::InvalidReading)` - A reading outside the
    ///   converter's raw range
    /// * `Err(AcquisitionError::Interrupted)` - `cancel` was set mid-frame
    pub fn acquire<A: AdcSource + ?Sized>(
        &self,
        adc: &mut A,
        cancel: &CancelToken,
    ) -> Result<Frame, AcquisitionError> {
        let sample_count = self.config.sample_count;
        let upper = adc.raw_full_scale();
        let lower = -upper - 1;

        let mut samples = Vec::with_capacity(sample_count);
        let mut scheduler = DeadlineScheduler::new(&self.clock, self.config.period());

        for index in 0..sample_count {
            let at = scheduler
                .wait_next(cancel)
                .ok_or(AcquisitionError::Interrupted { collected: index })?;
            let raw = adc
                .read()
                .map_err(|source| AcquisitionError::Driver { index, source })?;
            if raw < lower || raw > upper {
                return Err(AcquisitionError::InvalidReading { index, value: raw });
            }
            samples.push(Sample { raw, at });
        }

        Ok(Frame { samples })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adc::ReplaySource;
    use crate::clock::SimulatedClock;
    use crate::config::Gain;
    use crate::error::DriverError;

    /// Counts up from zero and fails once `fail_at` readings were taken.
    struct FlakyAdc {
        taken: usize,
        fail_at: Option<usize>,
        value_at_fault: Option<i32>,
    }

    impl FlakyAdc {
        fn new(fail_at: Option<usize>, value_at_fault: Option<i32>) -> Self {
            Self {
                taken: 0,
                fail_at,
                value_at_fault,
            }
        }
    }

    impl AdcSource for FlakyAdc {
        fn configure(&mut self, _: f64, _: Gain) -> Result<(), DriverError> {
            Ok(())
        }

        fn read(&mut self) -> Result<i32, DriverError> {
            if Some(self.taken) == self.fail_at {
                return match self.value_at_fault {
                    Some(value) => Ok(value),
                    None => Err(DriverError::Stream("bus error".into())),
                };
            }
            self.taken += 1;
            Ok(self.taken as i32)
        }

        fn reference_voltage(&self) -> f64 {
            4.096
        }
    }

    fn config(sample_count: usize) -> SamplingConfig {
        SamplingConfig {
            sample_count,
            sample_rate_hz: 1000.0,
            gain: Gain::One,
        }
    }

    #[test]
    fn frame_has_exactly_sample_count_readings() {
        let sampler = Sampler::new(config(64), SimulatedClock::new());
        let mut adc = FlakyAdc::new(None, None);
        let frame = sampler.acquire(&mut adc, &CancelToken::new()).unwrap();
        assert_eq!(frame.len(), 64);
        let values: Vec<i32> = frame.raw_values().collect();
        assert_eq!(values, (1..=64).collect::<Vec<_>>());
    }

    #[test]
    fn readings_are_tagged_with_their_deadlines() {
        let clock = SimulatedClock::with_poll_cost(Duration::from_micros(3));
        let sampler = Sampler::new(config(8), clock);
        let mut adc = FlakyAdc::new(None, None);
        let frame = sampler.acquire(&mut adc, &CancelToken::new()).unwrap();
        for (k, sample) in frame.samples().iter().enumerate() {
            assert_eq!(sample.at, Duration::from_millis(k as u64 + 1));
        }
        // The last reading happened within one poll of its deadline.
        assert!(sampler.clock().now() - Duration::from_millis(8) < Duration::from_micros(3));
    }

    #[test]
    fn driver_fault_mid_frame_is_an_acquisition_error() {
        let sampler = Sampler::new(config(64), SimulatedClock::new());
        let mut adc = FlakyAdc::new(Some(10), None);
        let err = sampler.acquire(&mut adc, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, AcquisitionError::Driver { index: 10, .. }));
    }

    #[test]
    fn out_of_range_reading_is_rejected() {
        let sampler = Sampler::new(config(16), SimulatedClock::new());
        let mut adc = FlakyAdc::new(Some(3), Some(40_000));
        let err = sampler.acquire(&mut adc, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, AcquisitionError::InvalidReading { index: 3, value: 40_000 }));
    }

    #[test]
    fn short_replay_never_yields_a_short_frame() {
        let sampler = Sampler::new(config(8), SimulatedClock::new());
        let mut adc = ReplaySource::new(vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        assert_eq!(sampler.acquire(&mut adc, &CancelToken::new()).unwrap().len(), 8);
        let err = sampler.acquire(&mut adc, &CancelToken::new()).unwrap_err();
        assert!(err.is_end_of_input());
    }

    #[test]
    fn cancellation_stops_acquisition() {
        let sampler = Sampler::new(config(64), SimulatedClock::new());
        let mut adc = FlakyAdc::new(None, None);
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = sampler.acquire(&mut adc, &cancel).unwrap_err();
        assert!(matches!(err, AcquisitionError::Interrupted { collected: 0 }));
        assert_eq!(adc.taken, 0);
    }
}
