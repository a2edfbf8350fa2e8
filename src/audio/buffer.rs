//! Time-indexed lock-free ring buffer for audio frames
//!
//! Frames are addressed by absolute sample time: the slot for time `t` is
//! `t & (capacity - 1)`. There is no read or write cursor; the producer
//! publishes the range of times the storage holds, and the consumer copies
//! whatever part of its request falls inside that range, zero-filling the
//! rest.

use crate::audio::bounds::{BoundsQueue, SampleTime, Snapshot, TimeBounds};
use crate::error::AllocError;
use std::fmt;
use std::sync::atomic::{fence, AtomicU8, Ordering};
use std::sync::Arc;

/// Outcome of a producer-side store
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreResult {
    /// Frames stored (or nothing to do for zero frames)
    Ok,
    /// More frames than the buffer capacity were passed in one call
    TooMuchData,
    /// Channel count or slice sizes do not match the allocation
    LayoutMismatch,
    /// The frames would run past the last representable sample time
    TimeOverflow,
}

impl StoreResult {
    pub fn is_ok(&self) -> bool {
        *self == StoreResult::Ok
    }
}

/// Outcome of a consumer-side fetch
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchResult {
    /// Every requested frame was valid and copied
    Ok,
    /// Part or all of the request was outside the valid range and zero-filled
    Underrun,
    /// More frames than the buffer capacity were requested in one call
    TooMuchData,
    /// Channel count or slice sizes do not match the allocation
    LayoutMismatch,
}

impl FetchResult {
    pub fn is_ok(&self) -> bool {
        *self == FetchResult::Ok
    }
}

/// Storage and bounds shared by the producer and consumer halves
///
/// The consumer may read slots the producer is overwriting at the same time.
/// Storage bytes are atomics so that race is defined behaviour; ordering comes
/// from the bounds queue and the fences around each copy, and the consumer
/// discards any frame a concurrent store may have torn.
struct Shared {
    storage: Box<[AtomicU8]>,
    channels: usize,
    bytes_per_frame: usize,
    capacity_frames: usize,
    bounds: BoundsQueue,
}

impl Shared {
    fn allocate(
        channels: usize,
        bytes_per_frame: usize,
        capacity_frames: usize,
    ) -> Result<Self, AllocError> {
        if channels == 0 {
            return Err(AllocError::ZeroChannels);
        }
        if bytes_per_frame == 0 {
            return Err(AllocError::ZeroBytesPerFrame);
        }
        if capacity_frames == 0 {
            return Err(AllocError::ZeroCapacity);
        }

        let too_large = || AllocError::TooLarge {
            channels,
            bytes_per_frame,
            capacity_frames,
        };

        let capacity = capacity_frames
            .checked_next_power_of_two()
            .filter(|c| *c <= i64::MAX as usize)
            .ok_or_else(too_large)?;
        let bytes = channels
            .checked_mul(bytes_per_frame)
            .and_then(|b| b.checked_mul(capacity))
            .filter(|b| *b <= isize::MAX as usize)
            .ok_or_else(too_large)?;

        let mut storage = Vec::new();
        storage
            .try_reserve_exact(bytes)
            .map_err(|_| AllocError::OutOfMemory { bytes })?;
        storage.resize_with(bytes, || AtomicU8::new(0));

        Ok(Self {
            storage: storage.into_boxed_slice(),
            channels,
            bytes_per_frame,
            capacity_frames: capacity,
            bounds: BoundsQueue::new(),
        })
    }

    fn channel(&self, channel: usize) -> &[AtomicU8] {
        let channel_bytes = self.capacity_frames * self.bytes_per_frame;
        &self.storage[channel * channel_bytes..(channel + 1) * channel_bytes]
    }

    /// Slot index of a sample time (bitmask modulo, correct for negative times)
    fn slot(&self, time: SampleTime) -> usize {
        (time & (self.capacity_frames as i64 - 1)) as usize
    }

    /// Copy `frames` frames from `src` into the slots starting at `time`
    fn write_frames(&self, channel: usize, src: &[u8], time: SampleTime, frames: usize) {
        let bpf = self.bytes_per_frame;
        let offset = self.slot(time) * bpf;
        let head = frames.min(self.capacity_frames - self.slot(time)) * bpf;
        let storage = self.channel(channel);

        let (src_head, src_tail) = src[..frames * bpf].split_at(head);
        copy_in(&storage[offset..offset + head], src_head);
        copy_in(&storage[..src_tail.len()], src_tail);
    }

    /// Copy `frames` frames starting at slot of `time` into `dst`
    fn read_frames(&self, channel: usize, dst: &mut [u8], time: SampleTime, frames: usize) {
        let bpf = self.bytes_per_frame;
        let offset = self.slot(time) * bpf;
        let head = frames.min(self.capacity_frames - self.slot(time)) * bpf;
        let storage = self.channel(channel);

        let (dst_head, dst_tail) = dst[..frames * bpf].split_at_mut(head);
        copy_out(dst_head, &storage[offset..offset + head]);
        let tail = dst_tail.len();
        copy_out(dst_tail, &storage[..tail]);
    }

    /// Only the single producer may call this.
    fn store<B: AsRef<[u8]>>(
        &self,
        frames: &[B],
        frame_count: usize,
        start_time: SampleTime,
    ) -> StoreResult {
        if frame_count == 0 {
            return StoreResult::Ok;
        }
        if frame_count > self.capacity_frames {
            return StoreResult::TooMuchData;
        }

        let needed = frame_count * self.bytes_per_frame;
        if frames.len() != self.channels || frames.iter().any(|f| f.as_ref().len() < needed) {
            return StoreResult::LayoutMismatch;
        }

        let Some(write_end) = start_time.checked_add(frame_count as i64) else {
            return StoreResult::TimeOverflow;
        };
        let write = TimeBounds::new(start_time, write_end);
        let latest = self.bounds.latest();
        let current = latest.bounds;

        let (start, epoch) = if start_time != current.end {
            // Not a continuation: discard everything and start a new timeline
            let epoch = latest.epoch + 1;
            self.bounds.publish(Snapshot {
                bounds: TimeBounds::new(start_time, start_time),
                epoch,
            });
            fence(Ordering::Release);
            (start_time, epoch)
        } else if write.end - current.start > self.capacity_frames as i64 {
            // Advance the start past the frames about to be overwritten
            let new_start = write.end - self.capacity_frames as i64;
            self.bounds.publish(Snapshot {
                bounds: TimeBounds::new(new_start, current.end.max(new_start)),
                epoch: latest.epoch,
            });
            fence(Ordering::Release);
            (new_start, latest.epoch)
        } else {
            (current.start, latest.epoch)
        };

        for (channel, src) in frames.iter().enumerate() {
            self.write_frames(channel, &src.as_ref()[..needed], start_time, frame_count);
        }

        self.bounds.publish(Snapshot {
            bounds: TimeBounds::new(start, write.end),
            epoch,
        });

        StoreResult::Ok
    }

    fn fetch<B: AsMut<[u8]>>(
        &self,
        out: &mut [B],
        frame_count: usize,
        start_time: SampleTime,
    ) -> FetchResult {
        if frame_count == 0 {
            return FetchResult::Ok;
        }
        if frame_count > self.capacity_frames {
            return FetchResult::TooMuchData;
        }

        let bpf = self.bytes_per_frame;
        let needed = frame_count * bpf;
        if out.len() != self.channels || out.iter_mut().any(|o| o.as_mut().len() < needed) {
            return FetchResult::LayoutMismatch;
        }

        let request = TimeBounds::span(start_time, frame_count);
        let Some(before) = self.bounds.snapshot() else {
            zero_range(out, 0, needed);
            return FetchResult::Underrun;
        };

        let valid = request.intersect(&before.bounds);
        if valid.is_empty() {
            zero_range(out, 0, needed);
            return FetchResult::Underrun;
        }

        let lead = (valid.start - request.start) as usize;
        let copied = valid.len();

        zero_range(out, 0, lead * bpf);
        for (channel, dst) in out.iter_mut().enumerate() {
            let dst = &mut dst.as_mut()[lead * bpf..(lead + copied) * bpf];
            self.read_frames(channel, dst, valid.start, copied);
        }
        zero_range(out, (lead + copied) * bpf, needed);

        // Anything below the start published after the copy may have been
        // overwritten while we were reading it
        fence(Ordering::Acquire);
        let keep_from = match self.bounds.snapshot() {
            Some(after) if after.epoch == before.epoch => {
                after.bounds.start.clamp(valid.start, valid.end)
            }
            _ => valid.end,
        };

        let stale = (keep_from - valid.start) as usize;
        if stale > 0 {
            zero_range(out, lead * bpf, (lead + stale) * bpf);
        }

        if stale == 0 && copied == frame_count {
            FetchResult::Ok
        } else {
            FetchResult::Underrun
        }
    }

    fn time_bounds(&self) -> TimeBounds {
        match self.bounds.snapshot() {
            Some(snapshot) => snapshot.bounds,
            None => {
                let end = self.bounds.latest().bounds.end;
                TimeBounds::new(end, end)
            }
        }
    }
}

fn copy_in(dst: &[AtomicU8], src: &[u8]) {
    for (slot, &byte) in dst.iter().zip(src) {
        slot.store(byte, Ordering::Relaxed);
    }
}

fn copy_out(dst: &mut [u8], src: &[AtomicU8]) {
    for (byte, slot) in dst.iter_mut().zip(src) {
        *byte = slot.load(Ordering::Relaxed);
    }
}

fn zero_range<B: AsMut<[u8]>>(out: &mut [B], from: usize, to: usize) {
    if from < to {
        for dst in out.iter_mut() {
            dst.as_mut()[from..to].fill(0);
        }
    }
}

/// Fixed-capacity ring buffer indexed by sample time
///
/// Owns its storage exclusively. Use [`RingBuffer::split`] to hand the
/// producer and consumer sides to two different callback threads.
pub struct RingBuffer {
    shared: Arc<Shared>,
}

impl RingBuffer {
    /// Allocate zeroed storage for `channel_count` streams of
    /// `capacity_frames` frames of `bytes_per_frame` bytes each
    ///
    /// Capacity is rounded up to the next power of 2.
    pub fn allocate(
        channel_count: usize,
        bytes_per_frame: usize,
        capacity_frames: usize,
    ) -> Result<Self, AllocError> {
        Ok(Self {
            shared: Arc::new(Shared::allocate(
                channel_count,
                bytes_per_frame,
                capacity_frames,
            )?),
        })
    }

    /// Store `frame_count` frames (one slice per channel) starting at `start_time`
    pub fn store<B: AsRef<[u8]>>(
        &mut self,
        frames: &[B],
        frame_count: usize,
        start_time: SampleTime,
    ) -> StoreResult {
        // `&mut self` and no Producer exists until `split`
        self.shared.store(frames, frame_count, start_time)
    }

    /// Fetch `frame_count` frames starting at `start_time` into `out`
    /// (one slice per channel), zero-filling anything not valid
    pub fn fetch<B: AsMut<[u8]>>(
        &self,
        out: &mut [B],
        frame_count: usize,
        start_time: SampleTime,
    ) -> FetchResult {
        self.shared.fetch(out, frame_count, start_time)
    }

    /// Snapshot of the currently valid sample-time range
    pub fn time_bounds(&self) -> TimeBounds {
        self.shared.time_bounds()
    }

    /// Capacity in frames (after rounding to a power of 2)
    pub fn capacity_frames(&self) -> usize {
        self.shared.capacity_frames
    }

    pub fn channel_count(&self) -> usize {
        self.shared.channels
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.shared.bytes_per_frame
    }

    /// Split into a producer half and a consumer half
    ///
    /// Storage is released when both halves have been dropped.
    pub fn split(self) -> (Producer, Consumer) {
        (
            Producer {
                shared: self.shared.clone(),
            },
            Consumer {
                shared: self.shared,
            },
        )
    }

    /// Release the backing storage
    pub fn deallocate(self) {
        drop(self);
    }
}

impl fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("channels", &self.shared.channels)
            .field("bytes_per_frame", &self.shared.bytes_per_frame)
            .field("capacity_frames", &self.shared.capacity_frames)
            .field("time_bounds", &self.shared.time_bounds())
            .finish()
    }
}

/// Producer half, owned by the input callback
pub struct Producer {
    shared: Arc<Shared>,
}

impl Producer {
    /// See [`RingBuffer::store`]
    pub fn store<B: AsRef<[u8]>>(
        &mut self,
        frames: &[B],
        frame_count: usize,
        start_time: SampleTime,
    ) -> StoreResult {
        // Producer is not Clone and `split` creates exactly one
        self.shared.store(frames, frame_count, start_time)
    }

    pub fn time_bounds(&self) -> TimeBounds {
        self.shared.time_bounds()
    }

    pub fn capacity_frames(&self) -> usize {
        self.shared.capacity_frames
    }

    pub fn channel_count(&self) -> usize {
        self.shared.channels
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.shared.bytes_per_frame
    }
}

/// Consumer half, owned by the output callback
pub struct Consumer {
    shared: Arc<Shared>,
}

impl Consumer {
    /// See [`RingBuffer::fetch`]
    pub fn fetch<B: AsMut<[u8]>>(
        &self,
        out: &mut [B],
        frame_count: usize,
        start_time: SampleTime,
    ) -> FetchResult {
        self.shared.fetch(out, frame_count, start_time)
    }

    pub fn time_bounds(&self) -> TimeBounds {
        self.shared.time_bounds()
    }

    pub fn capacity_frames(&self) -> usize {
        self.shared.capacity_frames
    }

    pub fn channel_count(&self) -> usize {
        self.shared.channels
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.shared.bytes_per_frame
    }
}
