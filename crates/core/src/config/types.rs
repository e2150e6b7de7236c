use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    pub host: HostConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    pub engine: EngineConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    #[serde(default)]
    pub rewriter: RewriterConfig,
    #[serde(default)]
    pub content_areas: Vec<ContentArea>,
}

/// Task database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("transcoder.db")
}

/// Host platform the files and documents live in.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HostConfig {
    /// SQLite database holding the `files` table and the content tables.
    pub database: PathBuf,
    /// Root of the blob store (`filedir/` and `trashdir/` live below it).
    pub data_root: PathBuf,
}

/// Worker admission settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    /// Maximum number of tasks in progress at the same time.
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    /// When true, discovery only enqueues; an external driver runs the worker.
    #[serde(default = "default_external_driver")]
    pub external_driver: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: default_concurrency_limit(),
            external_driver: default_external_driver(),
        }
    }
}

fn default_concurrency_limit() -> usize {
    1
}

fn default_external_driver() -> bool {
    true
}

/// Transcoding engine (ffmpeg) settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Path to ffmpeg binary.
    pub ffmpeg_path: PathBuf,

    /// Path to ffprobe binary.
    pub ffprobe_path: PathBuf,

    /// Timeout for a single conversion in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Threads handed to ffmpeg.
    #[serde(default = "default_threads")]
    pub threads: u32,

    #[serde(default = "default_video_codec")]
    pub video_codec: String,

    /// Audio codec, used for the audio track of videos and for audio files.
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,

    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate_kbps: u32,

    #[serde(default = "default_audio_channels")]
    pub audio_channels: u8,

    /// FFmpeg log level (quiet, panic, fatal, error, warning, info, verbose, debug, trace).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Extra encoder parameters for video, passed through verbatim as `key value` pairs.
    #[serde(default)]
    pub extra_video_params: BTreeMap<String, String>,
}

fn default_timeout() -> u64 {
    3600 // 1 hour
}

fn default_threads() -> u32 {
    2
}

fn default_video_codec() -> String {
    "libx264".to_string()
}

fn default_audio_codec() -> String {
    "libmp3lame".to_string()
}

fn default_audio_bitrate() -> u32 {
    128
}

fn default_audio_channels() -> u8 {
    2
}

fn default_log_level() -> String {
    "warning".to_string()
}

impl EngineConfig {
    /// Creates an engine config with the given binaries and default encoder settings.
    pub fn with_paths(ffmpeg_path: PathBuf, ffprobe_path: PathBuf) -> Self {
        Self {
            ffmpeg_path,
            ffprobe_path,
            timeout_secs: default_timeout(),
            threads: default_threads(),
            video_codec: default_video_codec(),
            audio_codec: default_audio_codec(),
            audio_bitrate_kbps: default_audio_bitrate(),
            audio_channels: default_audio_channels(),
            log_level: default_log_level(),
            extra_video_params: BTreeMap::new(),
        }
    }
}

/// Discovery job settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoveryConfig {
    /// Mimetypes of files that get queued for conversion.
    #[serde(default = "default_mimetypes")]
    pub mimetypes: Vec<String>,

    /// How far behind the high-water mark the scan starts, in seconds.
    #[serde(default = "default_lookback")]
    pub lookback_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            mimetypes: default_mimetypes(),
            lookback_secs: default_lookback(),
        }
    }
}

fn default_mimetypes() -> Vec<String> {
    vec!["video/webm".to_string(), "audio/ogg".to_string()]
}

fn default_lookback() -> u64 {
    60 * 60 * 24
}

/// Reconciliation job settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReconciliationConfig {
    /// Minutes after which an in-progress task is considered abandoned.
    #[serde(default = "default_staleness")]
    pub staleness_mins: u64,

    /// Number of times an abandoned task is put back in the queue before it fails.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Completed tasks finished within this many minutes get their references re-checked.
    /// Zero disables the check.
    #[serde(default = "default_recheck")]
    pub recheck_mins: u64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            staleness_mins: default_staleness(),
            max_retries: default_max_retries(),
            recheck_mins: default_recheck(),
        }
    }
}

fn default_staleness() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    2
}

fn default_recheck() -> u64 {
    30
}

/// Markup rewriting settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RewriterConfig {
    /// Prefix of `<source src>` values pointing at files of the document's own area.
    #[serde(default = "default_source_prefix")]
    pub source_prefix: String,
}

impl Default for RewriterConfig {
    fn default() -> Self {
        Self {
            source_prefix: default_source_prefix(),
        }
    }
}

fn default_source_prefix() -> String {
    "@@PLUGINFILE@@/".to_string()
}

/// A place where document markup may reference files of one storage area.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub struct ContentArea {
    /// Component owning the files (e.g. `mod_page`).
    pub component: String,
    /// File area inside the component (e.g. `content`).
    pub file_area: String,
    /// Table holding the documents.
    pub table: String,
    /// Column holding the markup.
    pub column: String,
    /// Column identifying the cache scope of a row (e.g. `course`).
    #[serde(default)]
    pub scope_column: Option<String>,
    /// Operator-facing URL for a row; `{id}` is replaced by the row id.
    #[serde(default)]
    pub url_template: Option<String>,
}

impl ContentArea {
    /// Creates an area with no scope column or URL template.
    pub fn new(
        component: impl Into<String>,
        file_area: impl Into<String>,
        table: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        Self {
            component: component.into(),
            file_area: file_area.into(),
            table: table.into(),
            column: column.into(),
            scope_column: None,
            url_template: None,
        }
    }

    /// Sets the scope column.
    pub fn with_scope_column(mut self, column: impl Into<String>) -> Self {
        self.scope_column = Some(column.into());
        self
    }

    /// Sets the URL template.
    pub fn with_url_template(mut self, template: impl Into<String>) -> Self {
        self.url_template = Some(template.into());
        self
    }

    /// Whether files stored under `component`/`file_area` belong to this area.
    pub fn holds(&self, component: &str, file_area: &str) -> bool {
        self.component == component && self.file_area == file_area
    }
}

impl fmt::Display for ContentArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} ({}.{})",
            self.component, self.file_area, self.table, self.column
        )
    }
}

/// Sanitized config for status output (paths only, no parameter values).
#[derive(Debug, Clone, Serialize)]
pub struct ConfigSummary {
    pub database: PathBuf,
    pub host_database: PathBuf,
    pub concurrency_limit: usize,
    pub external_driver: bool,
    pub mimetypes: Vec<String>,
    pub content_areas: usize,
}

impl From<&Config> for ConfigSummary {
    fn from(config: &Config) -> Self {
        Self {
            database: config.database.path.clone(),
            host_database: config.host.database.clone(),
            concurrency_limit: config.worker.concurrency_limit,
            external_driver: config.worker.external_driver,
            mimetypes: config.discovery.mimetypes.clone(),
            content_areas: config.content_areas.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[host]
database = "/srv/host.db"
data_root = "/srv/data"

[engine]
ffmpeg_path = "/usr/bin/ffmpeg"
ffprobe_path = "/usr/bin/ffprobe"

[[content_areas]]
component = "mod_page"
file_area = "content"
table = "page"
column = "content"
"#;

    #[test]
    fn test_deserialize_minimal_uses_defaults() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        assert_eq!(config.database.path.to_str().unwrap(), "transcoder.db");
        assert_eq!(config.worker.concurrency_limit, 1);
        assert!(config.worker.external_driver);
        assert_eq!(config.engine.timeout_secs, 3600);
        assert_eq!(config.engine.threads, 2);
        assert_eq!(config.engine.audio_codec, "libmp3lame");
        assert_eq!(config.discovery.mimetypes, vec!["video/webm", "audio/ogg"]);
        assert_eq!(config.discovery.lookback_secs, 86400);
        assert_eq!(config.reconciliation.staleness_mins, 30);
        assert_eq!(config.reconciliation.max_retries, 2);
        assert_eq!(config.rewriter.source_prefix, "@@PLUGINFILE@@/");
        assert_eq!(config.content_areas.len(), 1);
        assert!(config.content_areas[0].scope_column.is_none());
    }

    #[test]
    fn test_deserialize_missing_engine_fails() {
        let toml = r#"
[host]
database = "/srv/host.db"
data_root = "/srv/data"
"#;
        let result: Result<Config, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_deserialize_extra_video_params() {
        let toml = r#"
[host]
database = "/srv/host.db"
data_root = "/srv/data"

[engine]
ffmpeg_path = "ffmpeg"
ffprobe_path = "ffprobe"

[engine.extra_video_params]
"-preset" = "veryfast"
"-movflags" = "+faststart"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let params = &config.engine.extra_video_params;
        assert_eq!(params.len(), 2);
        assert_eq!(params.get("-preset").map(String::as_str), Some("veryfast"));
        assert_eq!(params.get("-movflags").map(String::as_str), Some("+faststart"));
    }

    #[test]
    fn test_deserialize_area_with_scope_and_url() {
        let toml = r#"
component = "mod_page"
file_area = "content"
table = "page"
column = "content"
scope_column = "course"
url_template = "https://lms.example/mod/page/view.php?id={id}"
"#;
        let area: ContentArea = toml::from_str(toml).unwrap();
        assert_eq!(area.scope_column.as_deref(), Some("course"));
        assert!(area.url_template.unwrap().contains("{id}"));
    }

    #[test]
    fn test_content_area_holds() {
        let area = ContentArea::new("mod_page", "content", "page", "content");
        assert!(area.holds("mod_page", "content"));
        assert!(!area.holds("mod_page", "intro"));
        assert!(!area.holds("mod_book", "content"));
    }

    #[test]
    fn test_config_summary() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        let summary = ConfigSummary::from(&config);
        assert_eq!(summary.concurrency_limit, 1);
        assert_eq!(summary.content_areas, 1);
        assert_eq!(summary.host_database.to_str().unwrap(), "/srv/host.db");
    }
}
