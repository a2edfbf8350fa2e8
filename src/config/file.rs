//! Configuration file support

use crate::audio::{Alignment, DeviceClock, EngineConfig, StreamFormat};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name looked up next to the working directory
const LOCAL_CONFIG: &str = "ringtime.toml";

/// Play-through configuration loaded from TOML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingtimeConfig {
    /// Ring buffer capacity in frames (rounded up to a power of 2)
    pub capacity_frames: usize,

    /// Frames the output stays behind the aligned input time
    pub latency_frames: u32,

    /// Offset measurement: "first-timestamps" or "time-bounds"
    pub alignment: Alignment,

    /// Drop every n-th input callback (0 = never)
    pub input_dropout_every: u64,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Log file path (empty = no file logging)
    pub log_file: String,

    /// Frame layout
    pub format: StreamFormat,

    /// Input device clock
    pub input: DeviceClock,

    /// Output device clock
    pub output: DeviceClock,
}

impl Default for RingtimeConfig {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            capacity_frames: engine.capacity_frames,
            latency_frames: engine.latency_frames,
            alignment: engine.alignment,
            input_dropout_every: engine.input_dropout_every,
            log_level: "info".to_string(),
            log_file: String::new(),
            format: engine.format,
            input: engine.input,
            output: engine.output,
        }
    }
}

impl RingtimeConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().to_string_lossy().to_string(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_string_lossy().to_string(),
            source: e,
        })
    }

    /// Load configuration from default locations
    ///
    /// Searches in order:
    /// 1. Current directory: ringtime.toml
    /// 2. Platform config directory: ringtime/config.toml
    pub fn load_default() -> Result<Self, ConfigError> {
        let local = Path::new(LOCAL_CONFIG);
        if local.exists() {
            return Self::load(local);
        }

        if let Some(path) = Self::default_path() {
            if path.exists() {
                return Self::load(&path);
            }
        }

        // Return default config if no file found
        Ok(Self::default())
    }

    /// Per-user config file location, if the platform has one
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("ringtime").join("config.toml"))
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;

        // Create parent directories if needed
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                    path: parent.to_string_lossy().to_string(),
                    source: e,
                })?;
            }
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Io {
            path: path.as_ref().to_string_lossy().to_string(),
            source: e,
        })
    }

    /// Convert to EngineConfig
    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            format: self.format,
            capacity_frames: self.capacity_frames,
            input: self.input,
            output: self.output,
            latency_frames: self.latency_frames,
            alignment: self.alignment,
            input_dropout_every: self.input_dropout_every,
        }
    }

    /// Generate a sample configuration file content
    pub fn sample_config() -> String {
        r#"# ringtime configuration

# Ring buffer capacity in frames, rounded up to a power of 2
# (three device periods absorbs normal scheduling jitter)
capacity_frames = 1536

# Frames the output plays behind the aligned input time
latency_frames = 512

# How the output learns the input/output offset:
# "first-timestamps" or "time-bounds"
alignment = "first-timestamps"

# Drop every n-th input callback to exercise resync (0 = never)
input_dropout_every = 0

# Log level: trace, debug, info, warn, error (default: info)
log_level = "info"

# Log file path (empty = no file logging)
log_file = ""

[format]
sample_rate = 48000
channels = 2
bytes_per_sample = 4
interleaved = false

[input]
sample_rate = 48000
period_frames = 512
drift_ppm = 0.0
start_time = 0

[output]
sample_rate = 48000
period_frames = 512
# Positive = output clock runs fast relative to nominal
drift_ppm = 0.0
start_time = 0
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_config_matches_default() {
        let parsed: RingtimeConfig = toml::from_str(&RingtimeConfig::sample_config()).unwrap();
        assert_eq!(parsed, RingtimeConfig::default());
        assert_eq!(parsed.to_engine_config(), EngineConfig::default());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: RingtimeConfig = toml::from_str(
            r#"
latency_frames = 256
alignment = "time-bounds"

[output]
drift_ppm = -150.0
"#,
        )
        .unwrap();

        assert_eq!(parsed.latency_frames, 256);
        assert_eq!(parsed.alignment, Alignment::TimeBounds);
        assert_eq!(parsed.output.drift_ppm, -150.0);
        assert_eq!(parsed.output.period_frames, 512);
        assert_eq!(parsed.capacity_frames, 1536);
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("ringtime-test-{}", std::process::id()));
        let path = dir.join("nested").join("config.toml");

        let config = RingtimeConfig {
            capacity_frames: 4096,
            input_dropout_every: 7,
            output: DeviceClock::new(48_000, 256).with_drift_ppm(12.5),
            ..RingtimeConfig::default()
        };
        config.save(&path).unwrap();

        let loaded = RingtimeConfig::load(&path).unwrap();
        assert_eq!(loaded, config);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_load_errors() {
        let missing = RingtimeConfig::load("/nonexistent/ringtime.toml").unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));

        let path = std::env::temp_dir().join(format!("ringtime-bad-{}.toml", std::process::id()));
        std::fs::write(&path, "capacity_frames = \"lots\"").unwrap();
        let bad = RingtimeConfig::load(&path).unwrap_err();
        assert!(matches!(bad, ConfigError::Parse { .. }));
        std::fs::remove_file(&path).unwrap();
    }
}
