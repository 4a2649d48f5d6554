use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::config::schema::Config;
use crate::error::ConfigError;

pub const CONFIG_PATH_ENV: &str = "ARCHIVER_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "/config/config.yaml";

/// Config path from an explicit flag, else `ARCHIVER_CONFIG`, else the
/// container default.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    match std::env::var(CONFIG_PATH_ENV) {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value.trim()),
        _ => PathBuf::from(DEFAULT_CONFIG_PATH),
    }
}

/// Loads, overrides from the environment, and validates.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        parse_config(&content)?
    } else {
        warn!(
            "Config file {} not found, using defaults. Use ARCHIVER_* env vars to configure.",
            path.display()
        );
        Config::default()
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    normalize(&mut config);
    validate_config(&config)?;

    Ok(config)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let mut config = parse_config(content)?;
    normalize(&mut config);
    validate_config(&config)?;
    Ok(config)
}

fn parse_config(content: &str) -> Result<Config, ConfigError> {
    if content.trim().is_empty() {
        return Ok(Config::default());
    }
    Ok(serde_yaml::from_str(content)?)
}

fn normalize(config: &mut Config) {
    config.airports.selected = config
        .airports
        .selected
        .iter()
        .map(|code| code.trim().to_uppercase())
        .filter(|code| !code.is_empty())
        .collect();
}

/// Applies `ARCHIVER_*` overrides read through `lookup`. Values that do not
/// parse are reported and skipped.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| {
        lookup(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
    let mut applied = 0usize;

    macro_rules! set_string {
        ($key:literal, $field:expr) => {
            if let Some(value) = get($key) {
                $field = value;
                applied += 1;
            }
        };
    }
    macro_rules! set_parsed {
        ($key:literal, $field:expr) => {
            if let Some(value) = get($key) {
                match value.parse() {
                    Ok(parsed) => {
                        $field = parsed;
                        applied += 1;
                    }
                    Err(_) => warn!("Ignoring invalid value for {}: {:?}", $key, value),
                }
            }
        };
    }
    macro_rules! set_bool {
        ($key:literal, $field:expr) => {
            if let Some(value) = get($key) {
                $field = parse_bool(&value);
                applied += 1;
            }
        };
    }

    set_string!("ARCHIVER_ARCHIVE_OUTPUT_DIR", config.archive.output_dir);
    set_parsed!("ARCHIVER_ARCHIVE_RETENTION_DAYS", config.archive.retention_days);
    set_parsed!("ARCHIVER_ARCHIVE_RETENTION_MAX_GB", config.archive.retention_max_gb);
    set_parsed!(
        "ARCHIVER_ARCHIVE_RETENTION_DAILY_HOUR",
        config.archive.retention_daily_hour
    );
    set_parsed!(
        "ARCHIVER_ARCHIVE_RETENTION_DAILY_MINUTE",
        config.archive.retention_daily_minute
    );
    set_bool!(
        "ARCHIVER_ARCHIVE_RETENTION_AFTER_RUN",
        config.archive.retention_after_run
    );

    set_parsed!(
        "ARCHIVER_SCHEDULE_INTERVAL_MINUTES",
        config.schedule.interval_minutes
    );
    set_bool!("ARCHIVER_SCHEDULE_FETCH_ON_START", config.schedule.fetch_on_start);
    set_parsed!(
        "ARCHIVER_SCHEDULE_JOB_TIMEOUT_MINUTES",
        config.schedule.job_timeout_minutes
    );
    set_parsed!(
        "ARCHIVER_SCHEDULE_PRIORITY_YIELD_MS",
        config.schedule.priority_yield_ms
    );

    set_string!(
        "ARCHIVER_SOURCE_AIRPORTS_API_URL",
        config.source.airports_api_url
    );
    set_string!("ARCHIVER_SOURCE_API_KEY", config.source.api_key);
    set_parsed!(
        "ARCHIVER_SOURCE_REQUEST_TIMEOUT",
        config.source.request_timeout_seconds
    );
    set_parsed!("ARCHIVER_SOURCE_MAX_RETRIES", config.source.max_retries);
    set_parsed!("ARCHIVER_SOURCE_RETRY_DELAY", config.source.retry_delay_seconds);
    set_bool!("ARCHIVER_SOURCE_USE_HISTORY_API", config.source.use_history_api);
    set_parsed!(
        "ARCHIVER_SOURCE_REQUEST_DELAY_SECONDS",
        config.source.request_delay_seconds
    );

    set_bool!("ARCHIVER_AIRPORTS_ARCHIVE_ALL", config.airports.archive_all);
    if let Some(value) = get("ARCHIVER_AIRPORTS_SELECTED") {
        config.airports.selected = value
            .split(',')
            .map(|code| code.trim().to_uppercase())
            .filter(|code| !code.is_empty())
            .collect();
        applied += 1;
    }

    set_parsed!("ARCHIVER_STATUS_LOG_BUFFER_SIZE", config.status.log_buffer_size);
    set_string!("ARCHIVER_LOGGING_LEVEL", config.logging.level);
    set_string!("ARCHIVER_LOGGING_FILE", config.logging.file);

    if applied > 0 {
        debug!("Applied {} config overrides from ARCHIVER_* environment variables", applied);
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

/// Checks the resolved config, reporting every problem at once.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if !config.airports.archive_all && config.airports.selected.is_empty() {
        errors.push("No airports selected (set airports.selected or airports.archive_all)".to_string());
    }

    let output_dir = config.archive.output_dir.trim();
    if output_dir.is_empty() {
        errors.push("archive.output_dir must not be empty".to_string());
    } else if output_dir == "/" {
        errors.push("archive.output_dir must not be the filesystem root".to_string());
    } else if Path::new(output_dir)
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        errors.push("archive.output_dir must not contain '..'".to_string());
    }

    if config.source.airports_api_url.trim().is_empty() {
        errors.push("source.airports_api_url must not be empty".to_string());
    }

    if config.schedule.interval_minutes < 1 {
        errors.push("schedule.interval_minutes must be at least 1".to_string());
    }

    let max_gb = config.archive.retention_max_gb;
    if max_gb.is_nan() || max_gb < 0.0 {
        errors.push("archive.retention_max_gb must be zero or positive".to_string());
    }

    if config.archive.retention_daily_hour > 23 {
        errors.push("archive.retention_daily_hour must be between 0 and 23".to_string());
    }
    if config.archive.retention_daily_minute > 59 {
        errors.push("archive.retention_daily_minute must be between 0 and 59".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Validation {
            message: errors.join("; "),
        })
    }
}
