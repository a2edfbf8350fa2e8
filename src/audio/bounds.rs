//! Sample-time bounds and the lock-free queue that publishes them

use std::sync::atomic::{fence, AtomicI64, AtomicU64, Ordering};

/// Signed 64-bit sample counter local to one producer clock
pub type SampleTime = i64;

/// Number of slots in the bounds queue (power of 2)
const QUEUE_SIZE: usize = 32;
const QUEUE_MASK: u64 = QUEUE_SIZE as u64 - 1;

/// How many times a reader retries before giving up on a snapshot
const SNAPSHOT_RETRIES: usize = 8;

/// Slot update marker while the producer is rewriting it
const WRITING: u64 = u64::MAX;

/// Half-open range `[start, end)` of sample times
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeBounds {
    pub start: SampleTime,
    pub end: SampleTime,
}

impl TimeBounds {
    pub fn new(start: SampleTime, end: SampleTime) -> Self {
        Self { start, end }
    }

    /// Range of `frames` frames beginning at `start`, clipped at the last
    /// representable sample time
    pub fn span(start: SampleTime, frames: usize) -> Self {
        Self {
            start,
            end: start.saturating_add(frames as i64),
        }
    }

    /// Number of frames in the range
    pub fn len(&self) -> usize {
        (self.end - self.start).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn contains(&self, time: SampleTime) -> bool {
        self.start <= time && time < self.end
    }

    /// Overlap of two ranges, empty (anchored at `self.start`) when disjoint
    pub fn intersect(&self, other: &TimeBounds) -> TimeBounds {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        if start < end {
            TimeBounds { start, end }
        } else {
            TimeBounds {
                start: self.start,
                end: self.start,
            }
        }
    }
}

impl From<TimeBounds> for (SampleTime, SampleTime) {
    fn from(bounds: TimeBounds) -> Self {
        (bounds.start, bounds.end)
    }
}

/// Bounds plus the resync epoch they belong to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Snapshot {
    pub bounds: TimeBounds,
    pub epoch: u64,
}

#[derive(Default)]
struct Slot {
    start: AtomicI64,
    end: AtomicI64,
    epoch: AtomicU64,
    update: AtomicU64,
}

/// Single-writer queue of published time bounds
///
/// The producer never rewrites the slot most recently published, so a reader
/// only has to retry when the producer laps the whole queue while it is
/// reading one slot.
pub(crate) struct BoundsQueue {
    slots: [Slot; QUEUE_SIZE],
    current: AtomicU64,
}

impl BoundsQueue {
    /// Empty queue publishing `[0, 0)` at epoch 0
    pub fn new() -> Self {
        let slots: [Slot; QUEUE_SIZE] = std::array::from_fn(|i| Slot {
            update: AtomicU64::new(if i == 0 { 0 } else { WRITING }),
            ..Slot::default()
        });

        Self {
            slots,
            current: AtomicU64::new(0),
        }
    }

    /// Publish new bounds (producer only)
    pub fn publish(&self, snapshot: Snapshot) {
        let next = self.current.load(Ordering::Relaxed) + 1;
        let slot = &self.slots[(next & QUEUE_MASK) as usize];

        slot.update.store(WRITING, Ordering::Relaxed);
        fence(Ordering::Release);

        slot.start.store(snapshot.bounds.start, Ordering::Relaxed);
        slot.end.store(snapshot.bounds.end, Ordering::Relaxed);
        slot.epoch.store(snapshot.epoch, Ordering::Relaxed);

        slot.update.store(next, Ordering::Release);
        self.current.store(next, Ordering::Release);
    }

    /// Last published bounds as seen by the producer itself (producer only)
    pub fn latest(&self) -> Snapshot {
        let current = self.current.load(Ordering::Relaxed);
        let slot = &self.slots[(current & QUEUE_MASK) as usize];

        Snapshot {
            bounds: TimeBounds {
                start: slot.start.load(Ordering::Relaxed),
                end: slot.end.load(Ordering::Relaxed),
            },
            epoch: slot.epoch.load(Ordering::Relaxed),
        }
    }

    /// Consistent snapshot for readers on any thread
    ///
    /// Returns `None` if the producer kept lapping the queue for
    /// `SNAPSHOT_RETRIES` attempts.
    pub fn snapshot(&self) -> Option<Snapshot> {
        for _ in 0..SNAPSHOT_RETRIES {
            let current = self.current.load(Ordering::Acquire);
            let slot = &self.slots[(current & QUEUE_MASK) as usize];

            if slot.update.load(Ordering::Acquire) != current {
                continue;
            }

            let start = slot.start.load(Ordering::Relaxed);
            let end = slot.end.load(Ordering::Relaxed);
            let epoch = slot.epoch.load(Ordering::Relaxed);

            fence(Ordering::Acquire);
            if slot.update.load(Ordering::Relaxed) == current {
                return Some(Snapshot {
                    bounds: TimeBounds { start, end },
                    epoch,
                });
            }
        }

        None
    }
}
