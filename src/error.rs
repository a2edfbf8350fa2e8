//! Unified error types for ringtime

use thiserror::Error;

/// Errors raised while allocating a ring buffer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    /// Channel count was zero
    #[error("channel count must be at least 1")]
    ZeroChannels,

    /// Frame size was zero
    #[error("bytes per frame must be at least 1")]
    ZeroBytesPerFrame,

    /// Capacity was zero
    #[error("capacity must be at least 1 frame")]
    ZeroCapacity,

    /// Requested size does not fit in the address space
    #[error(
        "buffer of {channels} channel(s) x {capacity_frames} frames x {bytes_per_frame} bytes is too large"
    )]
    TooLarge {
        channels: usize,
        bytes_per_frame: usize,
        capacity_frames: usize,
    },

    /// The allocator could not provide the storage
    #[error("out of memory allocating {bytes} bytes of ring buffer storage")]
    OutOfMemory { bytes: usize },
}

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO error reading/writing config file
    #[error("Failed to access config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Error parsing TOML
    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    /// Error serializing config
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Main error type for ringtime operations
#[derive(Error, Debug)]
pub enum RingtimeError {
    /// Ring buffer allocation failed
    #[error("Ring buffer allocation failed: {0}")]
    Alloc(#[from] AllocError),

    /// Config file could not be loaded or saved
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Engine already running
    #[error("Play-through engine already running")]
    AlreadyRunning,

    /// A device thread could not be spawned
    #[error("Failed to spawn {name} thread: {source}")]
    ThreadSpawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// A device thread panicked before it could be joined
    #[error("{0} device thread panicked")]
    ThreadPanicked(String),
}

/// Result type alias for ringtime operations
pub type Result<T> = std::result::Result<T, RingtimeError>;

impl RingtimeError {
    /// Create an invalid configuration error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Check if this error is recoverable (can retry)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RingtimeError::AlreadyRunning
                | RingtimeError::ThreadSpawn { .. }
                | RingtimeError::ThreadPanicked(_)
        )
    }
}
