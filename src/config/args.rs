//! CLI argument parsing using clap

use crate::audio::EngineConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// ringtime - time-indexed audio ring buffer play-through
///
/// Bridges a simulated input device and a simulated output device running on
/// independent clocks through a lock-free ring buffer
#[derive(Parser, Debug)]
#[command(name = "ringtime")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Configuration file (default: ./ringtime.toml, then the user config dir)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output (can be repeated for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode - only show errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log output to file
    #[arg(long, global = true)]
    pub log: Option<String>,
}

/// Settings that override the configuration file
#[derive(clap::Args, Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    /// Output clock drift in parts per million
    #[arg(long, allow_hyphen_values = true)]
    pub output_drift: Option<f64>,

    /// Output latency behind the aligned input time, in frames
    #[arg(long)]
    pub latency: Option<u32>,

    /// Ring buffer capacity in frames
    #[arg(long)]
    pub capacity: Option<usize>,

    /// Drop every n-th input callback (0 = never)
    #[arg(long)]
    pub dropout_every: Option<u64>,
}

impl Overrides {
    /// Apply every override that was given
    pub fn apply(&self, config: &mut EngineConfig) {
        if let Some(drift) = self.output_drift {
            config.output.drift_ppm = drift;
        }
        if let Some(latency) = self.latency {
            config.latency_frames = latency;
        }
        if let Some(capacity) = self.capacity {
            config.capacity_frames = capacity;
        }
        if let Some(every) = self.dropout_every {
            config.input_dropout_every = every;
        }
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run both simulated devices in real time on their own threads
    Run {
        /// Stop after this many seconds (default: run until Ctrl+C)
        #[arg(short, long)]
        seconds: Option<f64>,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Run both simulated devices offline, as fast as possible
    Simulate {
        /// Device time to simulate, in seconds
        #[arg(short, long, default_value = "10")]
        seconds: f64,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Print a sample configuration file
    Config {
        /// Write the sample to this path instead of stdout
        #[arg(short, long)]
        write: Option<PathBuf>,
    },
}

impl Args {
    /// Get the log level based on verbose/quiet flags
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else {
            match self.verbose {
                0 => tracing::Level::INFO,
                1 => tracing::Level::DEBUG,
                _ => tracing::Level::TRACE,
            }
        }
    }
}

impl Default for Command {
    fn default() -> Self {
        // Default to a short offline simulation
        Command::Simulate {
            seconds: 10.0,
            overrides: Overrides::default(),
        }
    }
}
