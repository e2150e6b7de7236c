//! Converter module for transcoding media files.
//!
//! This module provides the `Converter` trait and an implementation that
//! shells out to FFmpeg. Videos become H.264 MP4 files, audio becomes MP3.
//!
//! # Example
//!
//! ```ignore
//! use transcoder_core::converter::{ConversionJob, Converter, EncodeOptions, FfmpegConverter};
//! use transcoder_core::MediaKind;
//!
//! let converter = FfmpegConverter::new(ConverterConfig::from(&config.engine));
//! converter.validate().await?;
//!
//! let job = ConversionJob {
//!     job_id: "task-1".to_string(),
//!     input_path: PathBuf::from("/data/filedir/ab/cd/abcd..."),
//!     output_path: PathBuf::from("/data/temp/transcoder/abcd_transcoding.mp4"),
//!     kind: MediaKind::Video,
//!     options: EncodeOptions::from(&config.engine),
//! };
//!
//! let result = converter.convert(job).await?;
//! println!("Converted in {} ms", result.duration_ms);
//! ```

mod config;
mod error;
mod ffmpeg;
mod traits;
mod types;

pub use config::ConverterConfig;
pub use error::ConverterError;
pub use ffmpeg::FfmpegConverter;
pub use traits::Converter;
pub use types::{ConversionJob, ConversionResult, EncodeOptions, MediaInfo, MP3_CODEC};
