//! Configuration for the converter module.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::EngineConfig;

/// Configuration for the FFmpeg-based converter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterConfig {
    /// Path to ffmpeg binary.
    pub ffmpeg_path: PathBuf,

    /// Path to ffprobe binary.
    pub ffprobe_path: PathBuf,

    /// Timeout for a single conversion job in seconds.
    pub timeout_secs: u64,

    /// FFmpeg log level (quiet, panic, fatal, error, warning, info, verbose, debug, trace).
    pub ffmpeg_log_level: String,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            timeout_secs: 3600,
            ffmpeg_log_level: "warning".to_string(),
        }
    }
}

impl From<&EngineConfig> for ConverterConfig {
    fn from(engine: &EngineConfig) -> Self {
        Self {
            ffmpeg_path: engine.ffmpeg_path.clone(),
            ffprobe_path: engine.ffprobe_path.clone(),
            timeout_secs: engine.timeout_secs,
            ffmpeg_log_level: engine.log_level.clone(),
        }
    }
}
