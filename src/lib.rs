//! ringtime - time-indexed audio ring buffer
//!
//! A single-producer/single-consumer ring buffer addressed by device sample
//! time, plus the pieces needed to play audio from one simulated device
//! clock to another through it.

pub mod audio;
pub mod config;
pub mod error;
pub mod sync;

pub use error::{Result, RingtimeError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
