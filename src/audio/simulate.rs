//! Deterministic offline play-through
//!
//! Runs the same callbacks as [`PlayThroughEngine`](crate::audio::PlayThroughEngine)
//! on the calling thread, ordering input and output callbacks by the wall
//! time their simulated devices would fire them. Ties go to the input.

use crate::audio::stats::StreamStats;
use crate::audio::{EngineConfig, InputCallback, OutputCallback, StatsSnapshot, TimeBounds};
use crate::error::Result;
use crate::sync::ClockOffset;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Outcome of an offline run
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationReport {
    pub duration: Duration,
    pub input_callbacks: u64,
    pub output_callbacks: u64,
    pub input_dropouts: u64,
    pub clock_offset: Option<i64>,
    pub final_bounds: TimeBounds,
    pub stats: StatsSnapshot,
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Simulated {:.2}s:", self.duration.as_secs_f64())?;
        writeln!(
            f,
            "  Callbacks:       {} input ({} dropped) / {} output",
            self.input_callbacks, self.input_dropouts, self.output_callbacks
        )?;
        match self.clock_offset {
            Some(offset) => writeln!(f, "  Clock offset:    {} samples", offset)?,
            None => writeln!(f, "  Clock offset:    unresolved")?,
        }
        writeln!(
            f,
            "  Valid range:     [{}, {})",
            self.final_bounds.start, self.final_bounds.end
        )?;
        write!(f, "{}", self.stats)
    }
}

/// Run both simulated devices for `duration` of device time
pub fn run_offline(config: &EngineConfig, duration: Duration) -> Result<SimulationReport> {
    config.validate()?;

    let format = config.format;
    let buffer = format.allocate_ring_buffer(config.capacity_frames)?;
    info!(
        "Offline simulation: {:?} with {} x {} frame buffer",
        duration,
        buffer.channel_count(),
        buffer.capacity_frames()
    );

    let (producer, consumer) = buffer.split();
    let clock = Arc::new(ClockOffset::new());
    let stats = Arc::new(StreamStats::new());

    let mut input = InputCallback::new(
        producer,
        &format,
        config.input.period_frames as usize,
        clock.clone(),
        stats.clone(),
    );
    let mut output = OutputCallback::new(
        consumer,
        &format,
        config.output.period_frames as usize,
        clock.clone(),
        stats.clone(),
    )
    .with_alignment(config.alignment)
    .with_latency(config.latency_frames);

    let input_total = config.input.callbacks_in(duration);
    let output_total = config.output.callbacks_in(duration);
    let (mut n_in, mut n_out, mut dropouts) = (0u64, 0u64, 0u64);

    while n_in < input_total || n_out < output_total {
        let input_first = n_out >= output_total
            || (n_in < input_total
                && config.input.wall_time_of(n_in) <= config.output.wall_time_of(n_out));

        if input_first {
            let sample_time = config.input.sample_time_of(n_in);
            if config.is_dropout(n_in) {
                dropouts += 1;
            } else {
                let _ = input.render(sample_time, config.input.period_frames as usize);
            }
            n_in += 1;
        } else {
            let sample_time = config.output.sample_time_of(n_out);
            let _ = output.render(sample_time, config.output.period_frames as usize);
            n_out += 1;
        }
    }

    let report = SimulationReport {
        duration,
        input_callbacks: n_in,
        output_callbacks: n_out,
        input_dropouts: dropouts,
        clock_offset: clock.offset(),
        final_bounds: output.consumer().time_bounds(),
        stats: stats.snapshot(),
    };
    debug!("Simulation finished: {:?}", report.stats);

    Ok(report)
}
