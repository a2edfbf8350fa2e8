//! Ring buffer, simulated devices, and the play-through engine

mod bounds;
mod buffer;
mod callback;
mod device;
mod engine;
pub mod simulate;
mod stats;

pub use bounds::{SampleTime, TimeBounds};
pub use buffer::{Consumer, FetchResult, Producer, RingBuffer, StoreResult};
pub use callback::{Alignment, InputCallback, OutputCallback};
pub use device::{DeviceClock, PatternCheck, TestPattern};
pub use engine::{EngineConfig, EngineEvent, EngineState, PlayThroughEngine};
pub use stats::{StatsSnapshot, StreamStats};

use serde::{Deserialize, Serialize};

/// Audio stream format information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bytes_per_sample: u16,
    /// All channels in one buffer rather than one buffer per channel
    pub interleaved: bool,
}

impl Default for StreamFormat {
    /// 48kHz stereo 32-bit float, one buffer per channel
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            bytes_per_sample: 4,
            interleaved: false,
        }
    }
}

impl StreamFormat {
    /// Bytes of one frame across all channels
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * self.bytes_per_sample as usize
    }

    /// Number of separate buffers the ring buffer stores
    pub fn buffer_channels(&self) -> usize {
        if self.interleaved {
            1
        } else {
            self.channels as usize
        }
    }

    /// Stride of one frame inside each ring buffer channel
    pub fn buffer_bytes_per_frame(&self) -> usize {
        if self.interleaved {
            self.bytes_per_frame()
        } else {
            self.bytes_per_sample as usize
        }
    }

    /// Number of frames for given milliseconds
    pub fn frames_for_ms(&self, ms: u32) -> usize {
        ((self.sample_rate as u64 * ms as u64) / 1000) as usize
    }

    /// Calculate number of frames for given bytes of one buffer channel
    pub fn bytes_to_frames(&self, bytes: usize) -> usize {
        bytes / self.buffer_bytes_per_frame()
    }

    /// Calculate bytes of one buffer channel for given number of frames
    pub fn frames_to_bytes(&self, frames: usize) -> usize {
        frames * self.buffer_bytes_per_frame()
    }

    /// Allocate a ring buffer laid out for this format
    pub fn allocate_ring_buffer(
        &self,
        capacity_frames: usize,
    ) -> std::result::Result<RingBuffer, crate::error::AllocError> {
        RingBuffer::allocate(
            self.buffer_channels(),
            self.buffer_bytes_per_frame(),
            capacity_frames,
        )
    }

    /// Zeroed per-channel scratch buffers for `frames` frames
    pub fn scratch_buffers(&self, frames: usize) -> Vec<Vec<u8>> {
        vec![vec![0u8; self.frames_to_bytes(frames)]; self.buffer_channels()]
    }
}

impl std::fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}Hz {}ch {}bit {}",
            self.sample_rate,
            self.channels,
            self.bytes_per_sample * 8,
            if self.interleaved {
                "interleaved"
            } else {
                "non-interleaved"
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_interleaved_layout() {
        let format = StreamFormat::default();
        assert_eq!(format.bytes_per_frame(), 8);
        assert_eq!(format.buffer_channels(), 2);
        assert_eq!(format.buffer_bytes_per_frame(), 4);
        assert_eq!(format.frames_to_bytes(512), 2048);
        assert_eq!(format.bytes_to_frames(2048), 512);
        assert_eq!(format.to_string(), "48000Hz 2ch 32bit non-interleaved");
    }

    #[test]
    fn test_interleaved_layout() {
        let format = StreamFormat {
            channels: 6,
            bytes_per_sample: 2,
            interleaved: true,
            ..StreamFormat::default()
        };
        assert_eq!(format.buffer_channels(), 1);
        assert_eq!(format.buffer_bytes_per_frame(), 12);
        assert_eq!(format.frames_for_ms(10), 480);

        let buffer = format.allocate_ring_buffer(1536).unwrap();
        assert_eq!(buffer.channel_count(), 1);
        assert_eq!(buffer.bytes_per_frame(), 12);
        assert_eq!(buffer.capacity_frames(), 2048);

        let scratch = format.scratch_buffers(4);
        assert_eq!(scratch.len(), 1);
        assert_eq!(scratch[0].len(), 48);
    }
}
