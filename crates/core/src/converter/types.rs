//! Types for the converter module.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::config::EngineConfig;
use crate::media::MediaKind;

/// Codec used for MP3 output regardless of the configured audio codec.
pub const MP3_CODEC: &str = "libmp3lame";

/// Encoder settings for one conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodeOptions {
    /// Video codec for video output.
    pub video_codec: String,
    /// Audio codec for the audio track of video output.
    pub audio_codec: String,
    /// Bitrate of audio output in kbps.
    pub audio_bitrate_kbps: u32,
    /// Channel count of audio output.
    pub audio_channels: u8,
    pub threads: u32,
    /// Extra `key value` arguments for video output, passed verbatim.
    pub extra_video_params: BTreeMap<String, String>,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            audio_codec: MP3_CODEC.to_string(),
            audio_bitrate_kbps: 128,
            audio_channels: 2,
            threads: 2,
            extra_video_params: BTreeMap::new(),
        }
    }
}

impl From<&EngineConfig> for EncodeOptions {
    fn from(engine: &EngineConfig) -> Self {
        Self {
            video_codec: engine.video_codec.clone(),
            audio_codec: engine.audio_codec.clone(),
            audio_bitrate_kbps: engine.audio_bitrate_kbps,
            audio_channels: engine.audio_channels,
            threads: engine.threads,
            extra_video_params: engine.extra_video_params.clone(),
        }
    }
}

/// One conversion to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionJob {
    /// Unique job identifier, used in logs.
    pub job_id: String,
    /// Input file path.
    pub input_path: PathBuf,
    /// Output file path. Its extension selects the container.
    pub output_path: PathBuf,
    /// What the input is, and therefore what the output will be.
    pub kind: MediaKind,
    pub options: EncodeOptions,
}

/// Result of a successful conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionResult {
    /// Job ID.
    pub job_id: String,
    /// Output file path.
    pub output_path: PathBuf,
    /// Output file size in bytes.
    pub output_size_bytes: u64,
    /// Conversion duration in milliseconds.
    pub duration_ms: u64,
}

/// Information about a media file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaInfo {
    /// File path.
    pub path: PathBuf,
    /// File size in bytes.
    pub size_bytes: u64,
    /// Duration in seconds.
    pub duration_secs: f64,
    /// Container format (e.g., "webm", "ogg").
    pub format: String,
    /// Audio codec (if present).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_codec: Option<String>,
    /// Audio channels (if present).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_channels: Option<u8>,
    /// Video codec (if present).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_codec: Option<String>,
    /// Video width (if present).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_width: Option<u32>,
    /// Video height (if present).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_height: Option<u32>,
}
