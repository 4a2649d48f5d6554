use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_INTERVAL_MINUTES: u64 = 15;
pub const DEFAULT_REQUEST_DELAY_SECONDS: f64 = 1.2;
pub const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub archive: ArchiveConfig,
    pub schedule: ScheduleConfig,
    pub source: SourceConfig,
    pub airports: AirportsConfig,
    pub status: StatusConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub output_dir: String,
    /// Delete frames older than this many days. 0 disables.
    pub retention_days: u32,
    /// Keep the archive under this many GiB. 0 disables.
    pub retention_max_gb: f64,
    /// UTC time of the daily retention pass.
    pub retention_daily_hour: u32,
    pub retention_daily_minute: u32,
    /// Also run retention at the end of every archive run (small archives only).
    pub retention_after_run: bool,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            output_dir: "/archive".to_string(),
            retention_days: 0,
            retention_max_gb: 0.0,
            retention_daily_hour: 3,
            retention_daily_minute: 0,
            retention_after_run: false,
        }
    }
}

impl ArchiveConfig {
    pub fn retention_max_bytes(&self) -> u64 {
        if self.retention_max_gb > 0.0 {
            (self.retention_max_gb * BYTES_PER_GIB) as u64
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub interval_minutes: u64,
    pub fetch_on_start: bool,
    /// Time ceiling for manual and direct runs. 0 falls back to the
    /// scheduled budget.
    pub job_timeout_minutes: u64,
    /// Pause between frames so a concurrent reader is not starved. 0 disables.
    pub priority_yield_ms: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_minutes: DEFAULT_INTERVAL_MINUTES,
            fetch_on_start: true,
            job_timeout_minutes: 30,
            priority_yield_ms: 20,
        }
    }
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.max(1) * 60)
    }

    pub fn priority_yield(&self) -> Option<Duration> {
        (self.priority_yield_ms > 0).then(|| Duration::from_millis(self.priority_yield_ms))
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub airports_api_url: String,
    /// Partner API key. Wrapped in a secret as soon as a client is built.
    pub api_key: String,
    pub request_timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: f64,
    pub use_history_api: bool,
    /// Inter-request delay used when the rate-limit probe fails.
    pub request_delay_seconds: f64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            airports_api_url: "https://api.aviationwx.org/v1/airports".to_string(),
            api_key: String::new(),
            request_timeout_seconds: 30,
            max_retries: 3,
            retry_delay_seconds: 5.0,
            use_history_api: true,
            request_delay_seconds: DEFAULT_REQUEST_DELAY_SECONDS,
        }
    }
}

impl std::fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceConfig")
            .field("airports_api_url", &self.airports_api_url)
            .field(
                "api_key",
                &if self.api_key.trim().is_empty() { "" } else { "****" },
            )
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .field("max_retries", &self.max_retries)
            .field("retry_delay_seconds", &self.retry_delay_seconds)
            .field("use_history_api", &self.use_history_api)
            .field("request_delay_seconds", &self.request_delay_seconds)
            .finish()
    }
}

impl SourceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds.max(1))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_delay_seconds.max(0.0))
    }

    pub fn fallback_request_delay(&self) -> Duration {
        Duration::from_secs_f64(self.request_delay_seconds.max(0.0))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AirportsConfig {
    pub archive_all: bool,
    pub selected: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// Number of recent log events kept for status readers.
    pub log_buffer_size: usize,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            log_buffer_size: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Optional log file, in addition to stdout.
    pub file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            file: String::new(),
        }
    }
}
