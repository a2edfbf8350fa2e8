//! Simulated device clocks and a verifiable test signal
//!
//! Real devices are out of scope; these stand in for an input and an output
//! device that call back once per period on their own clock.

use crate::audio::SampleTime;
use crate::error::{Result, RingtimeError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Largest drift accepted, in parts per million
const MAX_DRIFT_PPM: f64 = 10_000.0;

/// A device clock: nominal rate, callback period, drift and sample-time origin
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceClock {
    /// Nominal sample rate in Hz
    pub sample_rate: u32,
    /// Frames delivered or requested per callback
    pub period_frames: u32,
    /// Deviation of the real rate from nominal (positive = fast)
    pub drift_ppm: f64,
    /// Sample time of the first callback
    pub start_time: SampleTime,
}

impl Default for DeviceClock {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            period_frames: 512,
            drift_ppm: 0.0,
            start_time: 0,
        }
    }
}

impl DeviceClock {
    pub fn new(sample_rate: u32, period_frames: u32) -> Self {
        Self {
            sample_rate,
            period_frames,
            ..Self::default()
        }
    }

    pub fn with_drift_ppm(mut self, drift_ppm: f64) -> Self {
        self.drift_ppm = drift_ppm;
        self
    }

    pub fn with_start_time(mut self, start_time: SampleTime) -> Self {
        self.start_time = start_time;
        self
    }

    /// Actual frames per second including drift
    pub fn effective_rate(&self) -> f64 {
        self.sample_rate as f64 * (1.0 + self.drift_ppm / 1_000_000.0)
    }

    /// Wall-clock time between callbacks
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(self.period_frames as f64 / self.effective_rate())
    }

    /// Sample time of the `callback`-th callback
    pub fn sample_time_of(&self, callback: u64) -> SampleTime {
        self.start_time + callback as i64 * self.period_frames as i64
    }

    /// Wall-clock offset of the `callback`-th callback from stream start
    pub fn wall_time_of(&self, callback: u64) -> Duration {
        Duration::from_secs_f64(
            callback as f64 * self.period_frames as f64 / self.effective_rate(),
        )
    }

    /// Number of callbacks that fit in `duration`
    pub fn callbacks_in(&self, duration: Duration) -> u64 {
        (duration.as_secs_f64() * self.effective_rate() / self.period_frames as f64) as u64
    }

    pub fn validate(&self, name: &str) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(RingtimeError::invalid_config(format!(
                "{name} sample rate must be non-zero"
            )));
        }
        if self.period_frames == 0 {
            return Err(RingtimeError::invalid_config(format!(
                "{name} period must be at least 1 frame"
            )));
        }
        if !self.drift_ppm.is_finite() || self.drift_ppm.abs() > MAX_DRIFT_PPM {
            return Err(RingtimeError::invalid_config(format!(
                "{name} drift must be within +/-{MAX_DRIFT_PPM} ppm"
            )));
        }
        Ok(())
    }
}

/// Result of checking fetched frames against the test signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PatternCheck {
    pub matching: u64,
    pub silent: u64,
    pub corrupt: u64,
}

/// Deterministic non-zero signal keyed by sample time and channel
///
/// Every byte of a frame carries the same value, so a zero frame is always
/// silence and anything else that does not match is corruption.
#[derive(Debug, Clone, Copy)]
pub struct TestPattern {
    channels: usize,
    bytes_per_frame: usize,
}

impl TestPattern {
    pub fn new(channels: usize, bytes_per_frame: usize) -> Self {
        Self {
            channels,
            bytes_per_frame,
        }
    }

    /// Byte value for `channel` at `time`, never zero
    pub fn value(time: SampleTime, channel: usize) -> u8 {
        ((time.rem_euclid(251) as usize + channel * 31) % 251 + 1) as u8
    }

    /// Fill `frames` frames of every channel buffer starting at `start`
    pub fn fill<B: AsMut<[u8]>>(&self, buffers: &mut [B], start: SampleTime, frames: usize) {
        for (channel, buffer) in buffers.iter_mut().enumerate().take(self.channels) {
            let buffer = buffer.as_mut();
            for (i, frame) in buffer
                .chunks_exact_mut(self.bytes_per_frame)
                .take(frames)
                .enumerate()
            {
                frame.fill(Self::value(start + i as i64, channel));
            }
        }
    }

    /// Classify each frame time as matching, silent or corrupt
    pub fn verify<B: AsRef<[u8]>>(
        &self,
        buffers: &[B],
        start: SampleTime,
        frames: usize,
    ) -> PatternCheck {
        let mut check = PatternCheck::default();

        for i in 0..frames {
            let time = start + i as i64;
            let mut silent = true;
            let mut corrupt = false;

            for (channel, buffer) in buffers.iter().enumerate().take(self.channels) {
                let offset = i * self.bytes_per_frame;
                let Some(frame) = buffer.as_ref().get(offset..offset + self.bytes_per_frame)
                else {
                    corrupt = true;
                    continue;
                };

                if frame.iter().all(|&b| b == 0) {
                    continue;
                }
                silent = false;

                let expected = Self::value(time, channel);
                if frame.iter().any(|&b| b != expected) {
                    corrupt = true;
                }
            }

            if corrupt {
                check.corrupt += 1;
            } else if silent {
                check.silent += 1;
            } else {
                check.matching += 1;
            }
        }

        check
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_timing() {
        let clock = DeviceClock::new(48_000, 480).with_start_time(1_000);
        assert!((clock.period().as_secs_f64() - 0.010).abs() < 1e-9);
        assert_eq!(clock.sample_time_of(0), 1_000);
        assert_eq!(clock.sample_time_of(3), 2_440);
        assert_eq!(clock.callbacks_in(Duration::from_secs(1)), 100);
    }

    #[test]
    fn test_drift_changes_rate() {
        let fast = DeviceClock::new(48_000, 480).with_drift_ppm(1_000.0);
        assert!((fast.effective_rate() - 48_048.0).abs() < 1e-6);
        assert!(fast.period() < Duration::from_millis(10));
        assert!(fast.wall_time_of(100) < Duration::from_secs(1));
    }

    #[test]
    fn test_validate() {
        assert!(DeviceClock::default().validate("input").is_ok());
        assert!(DeviceClock::new(0, 512).validate("input").is_err());
        assert!(DeviceClock::new(48_000, 0).validate("output").is_err());
        assert!(DeviceClock::default()
            .with_drift_ppm(f64::NAN)
            .validate("output")
            .is_err());
    }

    #[test]
    fn test_pattern_is_never_zero() {
        for time in -600..600 {
            for channel in 0..4 {
                assert_ne!(TestPattern::value(time, channel), 0);
            }
        }
    }

    #[test]
    fn test_pattern_verify() {
        let pattern = TestPattern::new(2, 4);
        let mut buffers = vec![vec![0u8; 40]; 2];
        pattern.fill(&mut buffers, 100, 10);

        let check = pattern.verify(&buffers, 100, 10);
        assert_eq!(check.matching, 10);

        // Silence the first 3 frames and damage one byte of frame 5
        for buffer in buffers.iter_mut() {
            buffer[..12].fill(0);
        }
        buffers[1][21] ^= 0xFF;

        let check = pattern.verify(&buffers, 100, 10);
        assert_eq!(
            check,
            PatternCheck {
                matching: 6,
                silent: 3,
                corrupt: 1
            }
        );

        // Checking against the wrong start time flags every non-silent frame
        let check = pattern.verify(&buffers, 101, 10);
        assert_eq!(check.silent, 3);
        assert_eq!(check.corrupt, 7);
    }
}
