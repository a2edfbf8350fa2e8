//! Lock-free counters shared between device callbacks and the engine

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-stream counters updated from real-time callbacks
///
/// Every update is a single relaxed atomic add, so callbacks can record
/// outcomes without locks. Read a consistent-enough view with
/// [`StreamStats::snapshot`].
#[derive(Default)]
pub struct StreamStats {
    stores: AtomicU64,
    store_errors: AtomicU64,
    fetches: AtomicU64,
    underruns: AtomicU64,
    fetch_errors: AtomicU64,
    frames_played: AtomicU64,
    silent_frames: AtomicU64,
    corrupt_frames: AtomicU64,
}

impl StreamStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_store(&self) {
        self.stores.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch(&self, frames: u64) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        self.frames_played.fetch_add(frames, Ordering::Relaxed);
    }

    pub fn record_underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_error(&self) {
        self.fetch_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frames(&self, silent: u64, corrupt: u64) {
        if silent > 0 {
            self.silent_frames.fetch_add(silent, Ordering::Relaxed);
        }
        if corrupt > 0 {
            self.corrupt_frames.fetch_add(corrupt, Ordering::Relaxed);
        }
    }

    /// Copy the current counter values
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            stores: self.stores.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
            frames_played: self.frames_played.load(Ordering::Relaxed),
            silent_frames: self.silent_frames.load(Ordering::Relaxed),
            corrupt_frames: self.corrupt_frames.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of [`StreamStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub stores: u64,
    pub store_errors: u64,
    pub fetches: u64,
    pub underruns: u64,
    pub fetch_errors: u64,
    pub frames_played: u64,
    pub silent_frames: u64,
    pub corrupt_frames: u64,
}

impl StatsSnapshot {
    /// Fraction of fetches that underran (0.0 when nothing was fetched)
    pub fn underrun_ratio(&self) -> f64 {
        if self.fetches == 0 {
            0.0
        } else {
            self.underruns as f64 / self.fetches as f64
        }
    }

    /// No frame ever came back with the wrong content
    pub fn is_clean(&self) -> bool {
        self.corrupt_frames == 0 && self.store_errors == 0 && self.fetch_errors == 0
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  Stores:          {}", self.stores)?;
        writeln!(f, "  Fetches:         {}", self.fetches)?;
        writeln!(
            f,
            "  Underruns:       {} ({:.1}%)",
            self.underruns,
            self.underrun_ratio() * 100.0
        )?;
        writeln!(f, "  Frames played:   {}", self.frames_played)?;
        writeln!(f, "  Silent frames:   {}", self.silent_frames)?;
        writeln!(f, "  Corrupt frames:  {}", self.corrupt_frames)?;
        write!(
            f,
            "  Caller errors:   {} store / {} fetch",
            self.store_errors, self.fetch_errors
        )
    }
}
