//! Play-through engine - runs a simulated input and output device on their own threads

use crate::audio::stats::StreamStats;
use crate::audio::{
    Alignment, DeviceClock, FetchResult, InputCallback, OutputCallback, SampleTime,
    StatsSnapshot, StoreResult, StreamFormat,
};
use crate::error::{Result, RingtimeError};
use crate::sync::ClockOffset;
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Frame layout shared by both devices
    pub format: StreamFormat,
    /// Ring buffer capacity in frames (rounded up to a power of 2)
    pub capacity_frames: usize,
    /// Input (producer) device clock
    pub input: DeviceClock,
    /// Output (consumer) device clock
    pub output: DeviceClock,
    /// How far behind the aligned input time the output plays
    pub latency_frames: u32,
    /// How the input/output offset is measured
    pub alignment: Alignment,
    /// Drop every n-th input callback to simulate dropouts (0 = never)
    pub input_dropout_every: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let input = DeviceClock::default();
        Self {
            format: StreamFormat::default(),
            // Three device buffers, as the play-through demos allocate
            capacity_frames: input.period_frames as usize * 3,
            input,
            output: DeviceClock::default(),
            latency_frames: input.period_frames,
            alignment: Alignment::default(),
            input_dropout_every: 0,
        }
    }
}

impl EngineConfig {
    /// Check the configuration can run without sample-rate conversion and
    /// without every fetch falling outside the buffer
    pub fn validate(&self) -> Result<()> {
        if self.format.channels == 0 || self.format.bytes_per_sample == 0 {
            return Err(RingtimeError::invalid_config(
                "format needs at least one channel and one byte per sample",
            ));
        }

        self.input.validate("input")?;
        self.output.validate("output")?;

        if self.input.sample_rate != self.format.sample_rate
            || self.output.sample_rate != self.format.sample_rate
        {
            return Err(RingtimeError::invalid_config(format!(
                "input ({}Hz) and output ({}Hz) must both run at the format rate ({}Hz)",
                self.input.sample_rate, self.output.sample_rate, self.format.sample_rate
            )));
        }

        let largest_period = self.input.period_frames.max(self.output.period_frames) as usize;
        if self.capacity_frames < largest_period {
            return Err(RingtimeError::invalid_config(format!(
                "capacity of {} frames is smaller than a {}-frame device period",
                self.capacity_frames, largest_period
            )));
        }

        let capacity = self
            .capacity_frames
            .checked_next_power_of_two()
            .filter(|c| *c <= i64::MAX as usize)
            .ok_or_else(|| {
                RingtimeError::invalid_config(format!(
                    "capacity of {} frames is too large",
                    self.capacity_frames
                ))
            })?;

        if self.latency_frames as usize + self.output.period_frames as usize > capacity {
            return Err(RingtimeError::invalid_config(format!(
                "latency of {} frames leaves no room for a {}-frame output period",
                self.latency_frames, self.output.period_frames
            )));
        }

        Ok(())
    }

    /// Whether the `callback`-th input callback is dropped
    pub fn is_dropout(&self, callback: u64) -> bool {
        self.input_dropout_every > 0
            && callback % self.input_dropout_every == self.input_dropout_every - 1
    }
}

/// Engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Never started
    Uninitialized,
    /// Started before, not running now
    Stopped,
    /// Running
    Running,
    /// Shutting down
    ShuttingDown,
}

/// Events from the device threads that external listeners might care about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// The output side learned the input/output offset
    ClockAligned { offset: i64 },
    /// An output callback was (partly) filled with silence
    Underrun { output_time: SampleTime },
    /// The ring buffer rejected an input callback
    StoreFailed {
        input_time: SampleTime,
        result: StoreResult,
    },
}

/// Runs an input device thread and an output device thread joined by a ring buffer
pub struct PlayThroughEngine {
    config: EngineConfig,
    state: Arc<Mutex<EngineState>>,
    stop_flag: Arc<AtomicBool>,
    input_handle: Option<JoinHandle<()>>,
    output_handle: Option<JoinHandle<()>>,
    stats: Arc<StreamStats>,
    clock: Arc<ClockOffset>,
    event_tx: Option<Sender<EngineEvent>>,
}

impl PlayThroughEngine {
    /// Create a new engine with the given configuration
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(EngineState::Uninitialized)),
            stop_flag: Arc::new(AtomicBool::new(false)),
            input_handle: None,
            output_handle: None,
            stats: Arc::new(StreamStats::new()),
            clock: Arc::new(ClockOffset::new()),
            event_tx: None,
        }
    }

    /// Set an event notification channel
    ///
    /// Device threads use `try_send`, so a full channel drops events rather
    /// than stalling a callback.
    pub fn set_event_channel(&mut self, tx: Sender<EngineEvent>) {
        self.event_tx = Some(tx);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Get current engine state
    pub fn state(&self) -> EngineState {
        *self.state.lock()
    }

    /// Check if engine is running
    pub fn is_running(&self) -> bool {
        *self.state.lock() == EngineState::Running
    }

    /// Counters accumulated since the last start
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Input/output offset, once measured
    pub fn clock_offset(&self) -> Option<i64> {
        self.clock.offset()
    }

    /// Allocate the ring buffer and start both device threads
    pub fn start(&mut self) -> Result<()> {
        {
            let state = self.state.lock();
            if *state == EngineState::Running {
                return Err(RingtimeError::AlreadyRunning);
            }
        }

        self.config.validate()?;
        info!("Starting play-through engine...");

        self.stop_flag.store(false, Ordering::SeqCst);
        self.clock.reset();
        self.stats = Arc::new(StreamStats::new());

        let format = self.config.format;
        let buffer = format.allocate_ring_buffer(self.config.capacity_frames)?;
        info!(
            "Ring buffer: {} x {} frames x {} bytes ({})",
            buffer.channel_count(),
            buffer.capacity_frames(),
            buffer.bytes_per_frame(),
            format
        );

        let (producer, consumer) = buffer.split();
        let input = InputCallback::new(
            producer,
            &format,
            self.config.input.period_frames as usize,
            self.clock.clone(),
            self.stats.clone(),
        );
        let output = OutputCallback::new(
            consumer,
            &format,
            self.config.output.period_frames as usize,
            self.clock.clone(),
            self.stats.clone(),
        )
        .with_alignment(self.config.alignment)
        .with_latency(self.config.latency_frames);

        let input_config = self.config.clone();
        let input_stop = self.stop_flag.clone();
        let input_events = self.event_tx.clone();
        self.input_handle = Some(spawn_device("input", move || {
            input_thread(input, input_config, input_stop, input_events);
        })?);

        let output_clock = self.config.output;
        let output_offset = self.clock.clone();
        let output_stop = self.stop_flag.clone();
        let output_events = self.event_tx.clone();
        let output_handle = spawn_device("output", move || {
            output_thread(output, output_clock, output_offset, output_stop, output_events);
        });

        match output_handle {
            Ok(handle) => self.output_handle = Some(handle),
            Err(e) => {
                self.stop_flag.store(true, Ordering::SeqCst);
                if let Some(handle) = self.input_handle.take() {
                    let _ = handle.join();
                }
                return Err(e);
            }
        }

        *self.state.lock() = EngineState::Running;
        info!("Play-through engine started");

        Ok(())
    }

    /// Stop both device threads and release the ring buffer
    pub fn stop(&mut self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != EngineState::Running {
                return Ok(());
            }
            *state = EngineState::ShuttingDown;
        }

        info!("Stopping play-through engine...");

        // Signal threads to stop
        self.stop_flag.store(true, Ordering::SeqCst);

        // Each thread owns one half of the buffer; joining both frees it
        let mut panicked = None;
        for (name, handle) in [
            ("input", self.input_handle.take()),
            ("output", self.output_handle.take()),
        ] {
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    warn!("The {} device thread panicked", name);
                    panicked.get_or_insert(name);
                }
            }
        }

        *self.state.lock() = EngineState::Stopped;
        info!("Play-through engine stopped");

        match panicked {
            Some(name) => Err(RingtimeError::ThreadPanicked(name.to_string())),
            None => Ok(()),
        }
    }
}

impl Drop for PlayThroughEngine {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn spawn_device<F>(name: &str, f: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(format!("ringtime-{name}"))
        .spawn(f)
        .map_err(|source| RingtimeError::ThreadSpawn {
            name: name.to_string(),
            source,
        })
}

/// Sleep until the `callback`-th period of `clock` is due
fn wait_for_callback(started: Instant, clock: &DeviceClock, callback: u64) {
    let due = started + clock.wall_time_of(callback);
    let now = Instant::now();
    if due > now {
        thread::sleep(due - now);
    }
}

/// Input device thread function
fn input_thread(
    mut callback: InputCallback,
    config: EngineConfig,
    stop_flag: Arc<AtomicBool>,
    events: Option<Sender<EngineEvent>>,
) {
    let clock = config.input;
    info!(
        "Input device thread started: {} frames every {:?}",
        clock.period_frames,
        clock.period()
    );

    let started = Instant::now();
    let mut n = 0u64;

    while !stop_flag.load(Ordering::Relaxed) {
        wait_for_callback(started, &clock, n);

        let sample_time = clock.sample_time_of(n);
        if config.is_dropout(n) {
            trace!("Input dropout at sample time {}", sample_time);
        } else {
            let result = callback.render(sample_time, clock.period_frames as usize);
            if !result.is_ok() {
                warn!("Store at {} failed: {:?}", sample_time, result);
                if let Some(tx) = &events {
                    let _ = tx.try_send(EngineEvent::StoreFailed {
                        input_time: sample_time,
                        result,
                    });
                }
            }
        }

        n += 1;
    }

    info!("Input device thread stopped after {} callbacks", n);
}

/// Output device thread function
fn output_thread(
    mut callback: OutputCallback,
    clock: DeviceClock,
    offset: Arc<ClockOffset>,
    stop_flag: Arc<AtomicBool>,
    events: Option<Sender<EngineEvent>>,
) {
    info!(
        "Output device thread started: {} frames every {:?}",
        clock.period_frames,
        clock.period()
    );

    let started = Instant::now();
    let mut n = 0u64;
    let mut aligned = false;

    while !stop_flag.load(Ordering::Relaxed) {
        wait_for_callback(started, &clock, n);

        let sample_time = clock.sample_time_of(n);
        let result = callback.render(sample_time, clock.period_frames as usize);

        if !aligned {
            if let Some(offset) = offset.offset() {
                aligned = true;
                info!("Output aligned to input with offset {} samples", offset);
                if let Some(tx) = &events {
                    let _ = tx.try_send(EngineEvent::ClockAligned { offset });
                }
            }
        }

        match result {
            FetchResult::Ok => {}
            FetchResult::Underrun => {
                trace!("Underrun at output sample time {}", sample_time);
                if let Some(tx) = &events {
                    let _ = tx.try_send(EngineEvent::Underrun {
                        output_time: sample_time,
                    });
                }
            }
            FetchResult::TooMuchData | FetchResult::LayoutMismatch => {
                warn!("Fetch at {} failed: {:?}", sample_time, result);
            }
        }

        n += 1;
    }

    debug!(
        "Output consumer last saw bounds {:?}",
        callback.consumer().time_bounds()
    );
    info!("Output device thread stopped after {} callbacks", n);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use std::thread::sleep;
    use std::time::Duration;

    fn fast_config() -> EngineConfig {
        // 10ms periods so a short test sees plenty of callbacks
        let clock = DeviceClock::new(48_000, 480);
        EngineConfig {
            capacity_frames: 480 * 4,
            input: clock.with_start_time(96_000),
            output: clock.with_start_time(3),
            latency_frames: 960,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.capacity_frames, 1536);
        assert_eq!(config.latency_frames, 512);
    }

    #[test]
    fn test_validate_rejects_rate_mismatch() {
        let config = EngineConfig {
            output: DeviceClock::new(44_100, 512),
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(RingtimeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_rejects_small_capacity() {
        let config = EngineConfig {
            capacity_frames: 256,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            latency_frames: 4096,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_huge_capacity() {
        let config = EngineConfig {
            capacity_frames: usize::MAX,
            ..EngineConfig::default()
        };
        match config.validate() {
            Err(RingtimeError::InvalidConfig(message)) => {
                assert!(message.contains("too large"), "{}", message)
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_dropout_schedule() {
        let config = EngineConfig {
            input_dropout_every: 4,
            ..EngineConfig::default()
        };
        let dropped: Vec<u64> = (0..12).filter(|n| config.is_dropout(*n)).collect();
        assert_eq!(dropped, vec![3, 7, 11]);
        assert!(!EngineConfig::default().is_dropout(0));
    }

    #[test]
    fn test_engine_start_stop() {
        let mut engine = PlayThroughEngine::new(fast_config());
        assert_eq!(engine.state(), EngineState::Uninitialized);

        engine.start().unwrap();
        assert!(engine.is_running());
        assert!(matches!(engine.start(), Err(RingtimeError::AlreadyRunning)));

        sleep(Duration::from_millis(200));
        engine.stop().unwrap();
        assert_eq!(engine.state(), EngineState::Stopped);

        let stats = engine.stats();
        assert!(stats.stores > 0);
        assert!(stats.fetches > 0);
        assert_eq!(stats.corrupt_frames, 0);
        assert!(engine.clock_offset().is_some());

        // Stopping twice is harmless
        engine.stop().unwrap();
    }

    #[test]
    fn test_engine_reports_alignment_event() {
        let (tx, rx) = bounded(256);
        let mut engine = PlayThroughEngine::new(fast_config());
        engine.set_event_channel(tx);

        engine.start().unwrap();
        sleep(Duration::from_millis(150));
        engine.stop().unwrap();

        let events: Vec<EngineEvent> = rx.try_iter().collect();
        let aligned = events
            .iter()
            .filter(|e| matches!(e, EngineEvent::ClockAligned { .. }))
            .count();
        assert_eq!(aligned, 1);
        assert!(events.contains(&EngineEvent::ClockAligned {
            offset: 96_000 - 3
        }));
    }

    #[test]
    fn test_engine_rejects_invalid_config() {
        let mut engine = PlayThroughEngine::new(EngineConfig {
            capacity_frames: 0,
            ..EngineConfig::default()
        });
        assert!(engine.start().is_err());
        assert!(!engine.is_running());
    }
}
