//! Builders for test configurations.

#![allow(dead_code)]

use std::path::Path;

use wxarchiver::config::Config;

/// Builder for `Config`, starting from settings that keep tests fast:
/// no startup run, no yield pauses, no retry backoff.
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        let mut config = Config::default();
        config.schedule.fetch_on_start = false;
        config.schedule.interval_minutes = 60;
        config.schedule.priority_yield_ms = 0;
        config.source.retry_delay_seconds = 0.0;
        config.source.request_delay_seconds = 0.0;
        config.source.max_retries = 2;
        Self { config }
    }

    pub fn output_dir(mut self, path: &Path) -> Self {
        self.config.archive.output_dir = path.display().to_string();
        self
    }

    pub fn airports(mut self, codes: &[&str]) -> Self {
        self.config.airports.archive_all = false;
        self.config.airports.selected = codes.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn archive_all(mut self) -> Self {
        self.config.airports.archive_all = true;
        self
    }

    pub fn use_history(mut self, enabled: bool) -> Self {
        self.config.source.use_history_api = enabled;
        self
    }

    pub fn fetch_on_start(mut self, enabled: bool) -> Self {
        self.config.schedule.fetch_on_start = enabled;
        self
    }

    pub fn interval_minutes(mut self, minutes: u64) -> Self {
        self.config.schedule.interval_minutes = minutes;
        self
    }

    pub fn retention_days(mut self, days: u32) -> Self {
        self.config.archive.retention_days = days;
        self
    }

    pub fn retention_max_gb(mut self, gb: f64) -> Self {
        self.config.archive.retention_max_gb = gb;
        self
    }

    pub fn retention_after_run(mut self, enabled: bool) -> Self {
        self.config.archive.retention_after_run = enabled;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
