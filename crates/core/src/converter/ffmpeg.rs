//! FFmpeg-based converter implementation.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::{debug, info};

use super::config::ConverterConfig;
use super::error::ConverterError;
use super::traits::Converter;
use super::types::{ConversionJob, ConversionResult, EncodeOptions, MediaInfo, MP3_CODEC};
use crate::media::MediaKind;

/// FFmpeg-based converter implementation.
pub struct FfmpegConverter {
    config: ConverterConfig,
}

impl FfmpegConverter {
    /// Creates a new FFmpeg converter with the given configuration.
    pub fn new(config: ConverterConfig) -> Self {
        Self { config }
    }

    /// Creates a converter with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ConverterConfig::default())
    }

    /// Builds ffmpeg arguments for a job.
    fn build_args(&self, job: &ConversionJob) -> Vec<String> {
        match job.kind {
            MediaKind::Video => self.build_video_args(&job.input_path, &job.output_path, &job.options),
            MediaKind::Audio => self.build_audio_args(&job.input_path, &job.output_path, &job.options),
        }
    }

    /// Builds ffmpeg arguments for video conversion.
    fn build_video_args(
        &self,
        input_path: &Path,
        output_path: &Path,
        options: &EncodeOptions,
    ) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-i".to_string(),
            input_path.to_string_lossy().to_string(),
            "-threads".to_string(),
            options.threads.to_string(),
            "-c:v".to_string(),
            options.video_codec.clone(),
            "-c:a".to_string(),
            options.audio_codec.clone(),
        ];

        // Extra encoder parameters, passed through as `key value` pairs
        for (key, value) in &options.extra_video_params {
            args.push(key.clone());
            args.push(value.clone());
        }

        args.extend([
            "-loglevel".to_string(),
            self.config.ffmpeg_log_level.clone(),
        ]);

        // Output
        args.push(output_path.to_string_lossy().to_string());

        args
    }

    /// Builds ffmpeg arguments for audio conversion.
    fn build_audio_args(
        &self,
        input_path: &Path,
        output_path: &Path,
        options: &EncodeOptions,
    ) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-i".to_string(),
            input_path.to_string_lossy().to_string(),
            "-threads".to_string(),
            options.threads.to_string(),
            "-vn".to_string(),
            "-c:a".to_string(),
            MP3_CODEC.to_string(),
            "-b:a".to_string(),
            format!("{}k", options.audio_bitrate_kbps),
            "-ac".to_string(),
            options.audio_channels.to_string(),
            "-loglevel".to_string(),
            self.config.ffmpeg_log_level.clone(),
            output_path.to_string_lossy().to_string(),
        ]
    }

    /// Parses ffprobe JSON output into MediaInfo.
    fn parse_probe_output(path: &Path, output: &str) -> Result<MediaInfo, ConverterError> {
        #[derive(Deserialize)]
        struct ProbeOutput {
            format: ProbeFormat,
            #[serde(default)]
            streams: Vec<ProbeStream>,
        }

        #[derive(Deserialize)]
        struct ProbeFormat {
            format_name: String,
            duration: Option<String>,
            size: Option<String>,
        }

        #[derive(Deserialize)]
        struct ProbeStream {
            codec_type: String,
            codec_name: Option<String>,
            channels: Option<u8>,
            width: Option<u32>,
            height: Option<u32>,
        }

        let probe: ProbeOutput =
            serde_json::from_str(output).map_err(|e| ConverterError::ParseError {
                reason: format!("Failed to parse ffprobe output: {}", e),
            })?;

        let duration_secs = probe
            .format
            .duration
            .as_ref()
            .and_then(|d| d.parse::<f64>().ok())
            .unwrap_or(0.0);

        let size_bytes = probe
            .format
            .size
            .as_ref()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);

        let audio_stream = probe.streams.iter().find(|s| s.codec_type == "audio");
        let video_stream = probe.streams.iter().find(|s| s.codec_type == "video");

        let format_name = probe
            .format
            .format_name
            .split(',')
            .next()
            .unwrap_or("unknown");

        Ok(MediaInfo {
            path: path.to_path_buf(),
            size_bytes,
            duration_secs,
            format: format_name.to_string(),
            audio_codec: audio_stream.and_then(|s| s.codec_name.clone()),
            audio_channels: audio_stream.and_then(|s| s.channels),
            video_codec: video_stream.and_then(|s| s.codec_name.clone()),
            video_width: video_stream.and_then(|s| s.width),
            video_height: video_stream.and_then(|s| s.height),
        })
    }

    /// Runs ffmpeg for a job, bounded by the configured timeout.
    async fn run_conversion(&self, job: &ConversionJob) -> Result<ConversionResult, ConverterError> {
        let start = Instant::now();

        if !job.input_path.exists() {
            return Err(ConverterError::InputNotFound {
                path: job.input_path.clone(),
            });
        }

        // Ensure output directory exists
        if let Some(parent) = job.output_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|_| {
                ConverterError::OutputDirectoryFailed {
                    path: parent.to_path_buf(),
                }
            })?;
        }

        // Probe is informational only
        match self.probe(&job.input_path).await {
            Ok(info) => info!(
                job_id = %job.job_id,
                format = %info.format,
                duration_secs = info.duration_secs,
                "Converting {} input", job.kind
            ),
            Err(e) => debug!(job_id = %job.job_id, error = %e, "Probe failed, converting anyway"),
        }

        let args = self.build_args(job);
        debug!(job_id = %job.job_id, ?args, "Running ffmpeg");

        let mut child = Command::new(&self.config.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ConverterError::FfmpegNotFound {
                        path: self.config.ffmpeg_path.clone(),
                    }
                } else {
                    ConverterError::Io(e)
                }
            })?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ConverterError::conversion_failed("stderr not captured", None))?;
        let mut reader = BufReader::new(stderr).lines();

        let timeout_duration = Duration::from_secs(self.config.timeout_secs);
        let result = timeout(timeout_duration, async {
            let mut error_output = String::new();

            while let Ok(Some(line)) = reader.next_line().await {
                if line.contains("Error") || line.contains("error") {
                    error_output.push_str(&line);
                    error_output.push('\n');
                }
            }

            let status = child.wait().await?;
            Ok::<(std::process::ExitStatus, String), std::io::Error>((status, error_output))
        })
        .await;

        match result {
            Ok(Ok((status, error_output))) => {
                if !status.success() {
                    return Err(ConverterError::conversion_failed(
                        format!("FFmpeg exited with code: {:?}", status.code()),
                        if error_output.is_empty() {
                            None
                        } else {
                            Some(error_output)
                        },
                    ));
                }
            }
            Ok(Err(e)) => return Err(ConverterError::Io(e)),
            Err(_) => {
                // Kill the process on timeout
                let _ = child.kill().await;
                return Err(ConverterError::Timeout {
                    timeout_secs: self.config.timeout_secs,
                });
            }
        }

        // Verify output exists and get size
        let output_meta = tokio::fs::metadata(&job.output_path)
            .await
            .map_err(|_| ConverterError::conversion_failed("Output file not created", None))?;

        Ok(ConversionResult {
            job_id: job.job_id.clone(),
            output_path: job.output_path.clone(),
            output_size_bytes: output_meta.len(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[async_trait]
impl Converter for FfmpegConverter {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn probe(&self, path: &Path) -> Result<MediaInfo, ConverterError> {
        if !path.exists() {
            return Err(ConverterError::InputNotFound {
                path: path.to_path_buf(),
            });
        }

        let output = Command::new(&self.config.ffprobe_path)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ConverterError::FfprobeNotFound {
                        path: self.config.ffprobe_path.clone(),
                    }
                } else {
                    ConverterError::Io(e)
                }
            })?;

        if !output.status.success() {
            return Err(ConverterError::probe_failed(format!(
                "ffprobe failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Self::parse_probe_output(path, &stdout)
    }

    async fn convert(&self, job: ConversionJob) -> Result<ConversionResult, ConverterError> {
        self.run_conversion(&job).await
    }

    async fn validate(&self) -> Result<(), ConverterError> {
        // Check ffmpeg exists
        let ffmpeg_result = Command::new(&self.config.ffmpeg_path)
            .arg("-version")
            .output()
            .await;

        if let Err(e) = ffmpeg_result {
            if e.kind() == std::io::ErrorKind::NotFound {
                return Err(ConverterError::FfmpegNotFound {
                    path: self.config.ffmpeg_path.clone(),
                });
            }
            return Err(ConverterError::Io(e));
        }

        // Check ffprobe exists
        let ffprobe_result = Command::new(&self.config.ffprobe_path)
            .arg("-version")
            .output()
            .await;

        if let Err(e) = ffprobe_result {
            if e.kind() == std::io::ErrorKind::NotFound {
                return Err(ConverterError::FfprobeNotFound {
                    path: self.config.ffprobe_path.clone(),
                });
            }
            return Err(ConverterError::Io(e));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn job(kind: MediaKind, options: EncodeOptions) -> ConversionJob {
        ConversionJob {
            job_id: "task-1".to_string(),
            input_path: PathBuf::from("/input.webm"),
            output_path: PathBuf::from("/output.mp4"),
            kind,
            options,
        }
    }

    #[test]
    fn test_build_video_args() {
        let converter = FfmpegConverter::with_defaults();
        let mut options = EncodeOptions::default();
        options.threads = 4;
        options
            .extra_video_params
            .insert("-preset".to_string(), "veryfast".to_string());

        let args = converter.build_args(&job(MediaKind::Video, options));

        assert_eq!(args[0], "-y");
        assert_eq!(&args[1..3], &["-i".to_string(), "/input.webm".to_string()]);
        assert!(args.windows(2).any(|w| w == ["-threads", "4"]));
        assert!(args.windows(2).any(|w| w == ["-c:v", "libx264"]));
        assert!(args.windows(2).any(|w| w == ["-c:a", "libmp3lame"]));
        assert!(args.windows(2).any(|w| w == ["-preset", "veryfast"]));
        assert_eq!(args.last().map(String::as_str), Some("/output.mp4"));
    }

    #[test]
    fn test_build_audio_args() {
        let converter = FfmpegConverter::with_defaults();
        let options = EncodeOptions {
            audio_codec: "aac".to_string(),
            audio_bitrate_kbps: 192,
            audio_channels: 1,
            ..EncodeOptions::default()
        };

        let args = converter.build_args(&job(MediaKind::Audio, options));

        // MP3 output always uses lame
        assert!(args.windows(2).any(|w| w == ["-c:a", "libmp3lame"]));
        assert!(args.windows(2).any(|w| w == ["-b:a", "192k"]));
        assert!(args.windows(2).any(|w| w == ["-ac", "1"]));
        assert!(args.contains(&"-vn".to_string()));
        assert!(!args.contains(&"-c:v".to_string()));
    }

    #[test]
    fn test_extra_params_passed_verbatim() {
        let converter = FfmpegConverter::with_defaults();
        let mut options = EncodeOptions::default();
        options
            .extra_video_params
            .insert("-an".to_string(), String::new());

        let args = converter.build_args(&job(MediaKind::Video, options));
        let idx = args.iter().position(|a| a == "-an").unwrap();
        assert_eq!(args[idx + 1], "");
        assert_eq!(args[idx + 2], "-loglevel");
    }

    #[test]
    fn test_parse_probe_output_video() {
        let json = r#"{
            "format": {
                "filename": "test.webm",
                "format_name": "matroska,webm",
                "duration": "95.5",
                "size": "5000000"
            },
            "streams": [
                {
                    "codec_type": "video",
                    "codec_name": "vp9",
                    "width": 1280,
                    "height": 720
                },
                {
                    "codec_type": "audio",
                    "codec_name": "opus",
                    "channels": 2
                }
            ]
        }"#;

        let info = FfmpegConverter::parse_probe_output(Path::new("test.webm"), json).unwrap();
        assert_eq!(info.format, "matroska");
        assert!((info.duration_secs - 95.5).abs() < 0.01);
        assert_eq!(info.size_bytes, 5000000);
        assert_eq!(info.video_codec, Some("vp9".to_string()));
        assert_eq!(info.video_width, Some(1280));
        assert_eq!(info.audio_codec, Some("opus".to_string()));
        assert_eq!(info.audio_channels, Some(2));
    }

    #[test]
    fn test_parse_probe_output_invalid() {
        let result = FfmpegConverter::parse_probe_output(Path::new("x"), "not json");
        assert!(matches!(result, Err(ConverterError::ParseError { .. })));
    }

    #[tokio::test]
    async fn test_convert_missing_input() {
        let converter = FfmpegConverter::with_defaults();
        let mut job = job(MediaKind::Video, EncodeOptions::default());
        job.input_path = PathBuf::from("/definitely/not/here.webm");

        let result = converter.convert(job).await;
        assert!(matches!(result, Err(ConverterError::InputNotFound { .. })));
    }

    #[tokio::test]
    async fn test_validate_missing_binary() {
        let converter = FfmpegConverter::new(ConverterConfig {
            ffmpeg_path: PathBuf::from("/definitely/not/ffmpeg"),
            ..ConverterConfig::default()
        });
        let result = converter.validate().await;
        assert!(matches!(result, Err(ConverterError::FfmpegNotFound { .. })));
    }
}
