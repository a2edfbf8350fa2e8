//! Input and output device callbacks around the ring buffer halves
//!
//! The input callback stores each captured period at its device timestamp.
//! The output callback maps its own timestamp into the input domain through
//! [`ClockOffset`], subtracts the configured latency, and fetches. Neither
//! allocates after construction.

use crate::audio::stats::StreamStats;
use crate::audio::{
    Consumer, FetchResult, Producer, SampleTime, StoreResult, StreamFormat, TestPattern,
};
use crate::sync::ClockOffset;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How the output callback learns the input/output sample-time offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Alignment {
    /// Difference between the first input and first output timestamps
    #[default]
    FirstTimestamps,
    /// Map the first output timestamp to the end of the buffer's valid range
    TimeBounds,
}

/// Producer-side callback driven by the input device
pub struct InputCallback {
    producer: Producer,
    clock: Arc<ClockOffset>,
    stats: Arc<StreamStats>,
    pattern: TestPattern,
    scratch: Vec<Vec<u8>>,
    observed: bool,
}

impl InputCallback {
    /// `max_frames` is the largest period the device will ever deliver
    pub fn new(
        producer: Producer,
        format: &StreamFormat,
        max_frames: usize,
        clock: Arc<ClockOffset>,
        stats: Arc<StreamStats>,
    ) -> Self {
        Self {
            pattern: TestPattern::new(format.buffer_channels(), format.buffer_bytes_per_frame()),
            scratch: format.scratch_buffers(max_frames),
            producer,
            clock,
            stats,
            observed: false,
        }
    }

    /// Capture `frames` frames stamped `sample_time` and store them
    pub fn render(&mut self, sample_time: SampleTime, frames: usize) -> StoreResult {
        if !self.observed {
            self.clock.observe_input(sample_time);
            self.observed = true;
        }

        self.pattern.fill(&mut self.scratch, sample_time, frames);
        let result = self.producer.store(&self.scratch, frames, sample_time);

        if result.is_ok() {
            self.stats.record_store();
        } else {
            self.stats.record_store_error();
        }
        result
    }

    pub fn producer(&self) -> &Producer {
        &self.producer
    }
}

/// Consumer-side callback driven by the output device
pub struct OutputCallback {
    consumer: Consumer,
    clock: Arc<ClockOffset>,
    stats: Arc<StreamStats>,
    pattern: TestPattern,
    output: Vec<Vec<u8>>,
    alignment: Alignment,
    latency_frames: u32,
}

impl OutputCallback {
    /// `max_frames` is the largest period the device will ever request
    pub fn new(
        consumer: Consumer,
        format: &StreamFormat,
        max_frames: usize,
        clock: Arc<ClockOffset>,
        stats: Arc<StreamStats>,
    ) -> Self {
        Self {
            pattern: TestPattern::new(format.buffer_channels(), format.buffer_bytes_per_frame()),
            output: format.scratch_buffers(max_frames),
            consumer,
            clock,
            stats,
            alignment: Alignment::default(),
            latency_frames: 0,
        }
    }

    pub fn with_alignment(mut self, alignment: Alignment) -> Self {
        self.alignment = alignment;
        self
    }

    /// Frames to stay behind the aligned input time
    pub fn with_latency(mut self, latency_frames: u32) -> Self {
        self.latency_frames = latency_frames;
        self
    }

    /// Render `frames` frames for the output timestamp `sample_time`
    ///
    /// Before the clock offset is known the output is silence and the
    /// callback counts an underrun.
    pub fn render(&mut self, sample_time: SampleTime, frames: usize) -> FetchResult {
        let offset = match self.alignment {
            Alignment::FirstTimestamps => self.clock.observe_output(sample_time),
            // Snapshot the bounds only until the offset is resolved
            Alignment::TimeBounds => match self.clock.offset() {
                Some(offset) => Some(offset),
                None => self
                    .clock
                    .align_to_bounds(self.consumer.time_bounds(), sample_time),
            },
        };

        let result = match offset {
            Some(offset) => {
                let start = sample_time + offset - self.latency_frames as i64;
                let result = self.consumer.fetch(&mut self.output, frames, start);
                if matches!(result, FetchResult::Ok | FetchResult::Underrun) {
                    let check = self.pattern.verify(&self.output, start, frames);
                    self.stats.record_frames(check.silent, check.corrupt);
                }
                result
            }
            None => {
                let bytes = self.consumer.bytes_per_frame() * frames;
                for channel in self.output.iter_mut() {
                    let end = bytes.min(channel.len());
                    channel[..end].fill(0);
                }
                self.stats.record_frames(frames as u64, 0);
                FetchResult::Underrun
            }
        };

        match result {
            FetchResult::Ok => self.stats.record_fetch(frames as u64),
            FetchResult::Underrun => {
                self.stats.record_fetch(frames as u64);
                self.stats.record_underrun();
            }
            FetchResult::TooMuchData | FetchResult::LayoutMismatch => {
                self.stats.record_fetch_error()
            }
        }
        result
    }

    /// Buffers written by the last `render`
    pub fn output(&self) -> &[Vec<u8>] {
        &self.output
    }

    pub fn consumer(&self) -> &Consumer {
        &self.consumer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{RingBuffer, TimeBounds};

    fn pair(
        format: &StreamFormat,
        capacity: usize,
        period: usize,
    ) -> (InputCallback, OutputCallback, Arc<StreamStats>, Arc<ClockOffset>) {
        let buffer = format.allocate_ring_buffer(capacity).unwrap();
        let (producer, consumer) = buffer.split();
        let clock = Arc::new(ClockOffset::new());
        let stats = Arc::new(StreamStats::new());
        let input = InputCallback::new(producer, format, period, clock.clone(), stats.clone());
        let output = OutputCallback::new(consumer, format, period, clock.clone(), stats.clone());
        (input, output, stats, clock)
    }

    #[test]
    fn test_output_is_silent_until_aligned() {
        let format = StreamFormat::default();
        let (_input, mut output, stats, _clock) = pair(&format, 256, 64);

        assert_eq!(output.render(1_000, 64), FetchResult::Underrun);
        assert!(output.output().iter().all(|c| c.iter().all(|&b| b == 0)));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.underruns, 1);
        assert_eq!(snapshot.silent_frames, 64);
    }

    #[test]
    fn test_first_timestamp_alignment_plays_input() {
        let format = StreamFormat::default();
        let (mut input, output, stats, clock) = pair(&format, 256, 64);
        let mut output = output.with_latency(64);

        // Input and output count from unrelated origins
        for n in 0..20i64 {
            assert!(input.render(50_000 + n * 64, 64).is_ok());
            let result = output.render(7 + n * 64, 64);
            if n == 0 {
                assert_eq!(result, FetchResult::Underrun);
            } else {
                assert_eq!(result, FetchResult::Ok);
            }
        }

        assert_eq!(clock.offset(), Some(50_000 - 7));
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.stores, 20);
        assert_eq!(snapshot.fetches, 20);
        assert_eq!(snapshot.underruns, 1);
        assert_eq!(snapshot.corrupt_frames, 0);
        assert_eq!(snapshot.silent_frames, 64);
    }

    #[test]
    fn test_time_bounds_alignment() {
        let format = StreamFormat {
            channels: 1,
            bytes_per_sample: 2,
            ..StreamFormat::default()
        };
        let (mut input, output, stats, clock) = pair(&format, 512, 128);
        let mut output = output
            .with_alignment(Alignment::TimeBounds)
            .with_latency(128);

        assert!(input.render(1_000, 128).is_ok());
        assert!(input.render(1_128, 128).is_ok());
        assert_eq!(
            output.consumer().time_bounds(),
            TimeBounds::new(1_000, 1_256)
        );

        assert_eq!(output.render(0, 128), FetchResult::Ok);
        assert_eq!(clock.offset(), Some(1_256));

        let check = TestPattern::new(1, 2).verify(output.output(), 1_128, 128);
        assert_eq!(check.matching, 128);
        assert!(stats.snapshot().is_clean());
    }

    #[test]
    fn test_time_bounds_offset_fixed_after_first_alignment() {
        let format = StreamFormat {
            channels: 1,
            bytes_per_sample: 1,
            ..StreamFormat::default()
        };
        let (mut input, output, stats, clock) = pair(&format, 256, 32);
        let mut output = output.with_alignment(Alignment::TimeBounds);

        assert!(input.render(500, 32).is_ok());
        assert_eq!(output.render(0, 32), FetchResult::Underrun);
        assert_eq!(clock.offset(), Some(532));

        // Input jumps to a new timeline; the output keeps the first mapping
        assert!(input.render(10_000, 32).is_ok());
        assert_eq!(
            output.consumer().time_bounds(),
            TimeBounds::new(10_000, 10_032)
        );
        assert_eq!(output.render(32, 32), FetchResult::Underrun);
        assert_eq!(clock.offset(), Some(532));
        assert!(output.output()[0].iter().all(|&b| b == 0));
        assert_eq!(stats.snapshot().underruns, 2);
    }

    #[test]
    fn test_oversized_period_is_an_error() {
        let format = StreamFormat::default();
        let buffer = RingBuffer::allocate(2, 4, 64).unwrap();
        let (producer, _consumer) = buffer.split();
        let stats = Arc::new(StreamStats::new());
        let mut input = InputCallback::new(
            producer,
            &format,
            128,
            Arc::new(ClockOffset::new()),
            stats.clone(),
        );

        assert_eq!(input.render(0, 128), StoreResult::TooMuchData);
        assert_eq!(stats.snapshot().store_errors, 1);
        assert!(input.producer().time_bounds().is_empty());
    }
}
