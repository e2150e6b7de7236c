//! Media kinds handled by the transcoder.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Broad kind of a convertible file, decided by the top-level mimetype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Converted to H.264 in an MP4 container.
    Video,
    /// Converted to MP3.
    Audio,
}

impl MediaKind {
    /// Kind of a file with the given mimetype, if it is one we convert.
    pub fn from_mimetype(mimetype: &str) -> Option<Self> {
        match mimetype.split('/').next()?.trim().to_ascii_lowercase().as_str() {
            "video" => Some(MediaKind::Video),
            "audio" => Some(MediaKind::Audio),
            _ => None,
        }
    }

    /// Markup element that embeds this kind.
    pub fn tag(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }

    /// Extension of the converted output.
    pub fn output_extension(&self) -> &'static str {
        match self {
            MediaKind::Video => "mp4",
            MediaKind::Audio => "mp3",
        }
    }

    /// Mimetype of the converted output.
    pub fn output_mimetype(&self) -> &'static str {
        match self {
            MediaKind::Video => "video/mp4",
            MediaKind::Audio => "audio/mpeg",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}
