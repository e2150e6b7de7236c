use super::{types::Config, ConfigError};

/// Validate configuration.
///
/// Serde already enforces the required sections; this checks the values that
/// would otherwise only fail halfway through a job.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.worker.concurrency_limit == 0 {
        return Err(invalid("worker.concurrency_limit must be at least 1"));
    }

    let engine = &config.engine;
    if engine.ffmpeg_path.as_os_str().is_empty() {
        return Err(invalid("engine.ffmpeg_path is required"));
    }
    if engine.ffprobe_path.as_os_str().is_empty() {
        return Err(invalid("engine.ffprobe_path is required"));
    }
    if engine.timeout_secs == 0 {
        return Err(invalid("engine.timeout_secs cannot be 0"));
    }
    if engine.threads == 0 {
        return Err(invalid("engine.threads cannot be 0"));
    }
    if engine.video_codec.trim().is_empty() || engine.audio_codec.trim().is_empty() {
        return Err(invalid("engine codecs cannot be empty"));
    }
    if engine.audio_bitrate_kbps == 0 {
        return Err(invalid("engine.audio_bitrate_kbps cannot be 0"));
    }
    if engine.audio_channels == 0 {
        return Err(invalid("engine.audio_channels cannot be 0"));
    }

    if config.discovery.mimetypes.is_empty() {
        return Err(invalid("discovery.mimetypes cannot be empty"));
    }
    if config.reconciliation.staleness_mins == 0 {
        return Err(invalid("reconciliation.staleness_mins cannot be 0"));
    }

    if config.content_areas.is_empty() {
        return Err(invalid("at least one [[content_areas]] entry is required"));
    }
    for area in &config.content_areas {
        if area.component.is_empty() || area.file_area.is_empty() {
            return Err(invalid(&format!(
                "content area {} needs a component and a file_area",
                area
            )));
        }
        check_identifier("table", &area.table)?;
        check_identifier("column", &area.column)?;
        if let Some(ref scope) = area.scope_column {
            check_identifier("scope_column", scope)?;
        }
    }

    Ok(())
}

/// Table and column names end up inside SQL text, so only plain identifiers pass.
fn check_identifier(field: &str, value: &str) -> Result<(), ConfigError> {
    let mut chars = value.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(invalid(&format!(
            "content area {} `{}` is not a valid identifier",
            field, value
        )))
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::ValidationError(message.to_string())
}
