//! Input/output sample-time alignment
//!
//! An input device and an output device count sample time from unrelated
//! origins. The offset between the two domains is measured once, either from
//! the first timestamp each callback sees or from the ring buffer's time
//! bounds, and then applied to every output timestamp.

use crate::audio::{SampleTime, TimeBounds};
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::debug;

/// Marker for "not observed yet"
const UNSET: i64 = i64::MIN;

/// Lock-free clock offset shared by the input and output callbacks
///
/// Each side records its first sample time; whichever side completes the
/// pair resolves `offset = first_input - first_output` exactly once.
#[derive(Debug)]
pub struct ClockOffset {
    first_input: AtomicI64,
    first_output: AtomicI64,
    offset: AtomicI64,
}

impl Default for ClockOffset {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockOffset {
    pub fn new() -> Self {
        Self {
            first_input: AtomicI64::new(UNSET),
            first_output: AtomicI64::new(UNSET),
            offset: AtomicI64::new(UNSET),
        }
    }

    /// Record an input callback timestamp; only the first call counts
    pub fn observe_input(&self, time: SampleTime) -> Option<i64> {
        let _ = self
            .first_input
            .compare_exchange(UNSET, time, Ordering::SeqCst, Ordering::SeqCst);
        self.try_resolve()
    }

    /// Record an output callback timestamp; only the first call counts
    pub fn observe_output(&self, time: SampleTime) -> Option<i64> {
        let _ = self
            .first_output
            .compare_exchange(UNSET, time, Ordering::SeqCst, Ordering::SeqCst);
        self.try_resolve()
    }

    fn try_resolve(&self) -> Option<i64> {
        if let Some(offset) = self.offset() {
            return Some(offset);
        }

        // SeqCst so two callbacks racing here cannot both miss the other side
        let input = self.first_input.load(Ordering::SeqCst);
        let output = self.first_output.load(Ordering::SeqCst);
        if input == UNSET || output == UNSET {
            return None;
        }

        self.resolve(input - output)
    }

    /// Resolve the offset from a time-bounds snapshot so that `output_time`
    /// maps to the end of the valid range
    ///
    /// Does nothing if the bounds are empty or the offset is already known.
    pub fn align_to_bounds(&self, bounds: TimeBounds, output_time: SampleTime) -> Option<i64> {
        if let Some(offset) = self.offset() {
            return Some(offset);
        }
        if bounds.is_empty() {
            return None;
        }

        let _ = self.first_output.compare_exchange(
            UNSET,
            output_time,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        self.resolve(bounds.end - output_time)
    }

    fn resolve(&self, candidate: i64) -> Option<i64> {
        match self
            .offset
            .compare_exchange(UNSET, candidate, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                debug!("Input/output clock offset resolved: {} samples", candidate);
                Some(candidate)
            }
            Err(existing) => Some(existing),
        }
    }

    /// Resolved offset, if both sides have been observed
    pub fn offset(&self) -> Option<i64> {
        match self.offset.load(Ordering::Acquire) {
            UNSET => None,
            offset => Some(offset),
        }
    }

    pub fn first_input_time(&self) -> Option<SampleTime> {
        match self.first_input.load(Ordering::Acquire) {
            UNSET => None,
            time => Some(time),
        }
    }

    pub fn first_output_time(&self) -> Option<SampleTime> {
        match self.first_output.load(Ordering::Acquire) {
            UNSET => None,
            time => Some(time),
        }
    }

    /// Map an output timestamp into the input sample-time domain
    pub fn input_time_for(&self, output_time: SampleTime) -> Option<SampleTime> {
        self.offset().map(|offset| output_time + offset)
    }

    /// Forget everything (e.g. when a stream restarts)
    pub fn reset(&self) {
        self.offset.store(UNSET, Ordering::Release);
        self.first_input.store(UNSET, Ordering::Release);
        self.first_output.store(UNSET, Ordering::Release);
    }
}
